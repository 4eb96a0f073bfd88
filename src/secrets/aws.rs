//! AWS SSM Parameter Store provider.
//!
//! Values are stored as `SecureString` parameters, optionally encrypted
//! with a customer-managed KMS key. Parameter names get a leading `/`.
//! The value size limit is 4 KiB for standard parameters:
//! https://docs.aws.amazon.com/systems-manager/latest/userguide/parameter-store-advanced-parameters.html

use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ssm::config::Region;
use aws_sdk_ssm::types::ParameterType;

use super::SecretStore;
use crate::config::Config;

pub struct AwsStore {
    client: aws_sdk_ssm::Client,
    kms_key_id: Option<String>,
}

impl AwsStore {
    pub async fn new(config: &Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.aws_region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        Self {
            client: aws_sdk_ssm::Client::new(&sdk_config),
            kms_key_id: config.aws_kms_key_id.clone(),
        }
    }

    fn name(key: &str) -> String {
        format!("/{key}")
    }
}

#[async_trait]
impl SecretStore for AwsStore {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.client
            .put_parameter()
            .name(Self::name(key))
            .value(value)
            .r#type(ParameterType::SecureString)
            .set_key_id(self.kms_key_id.clone())
            .overwrite(true)
            .send()
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        let out = self
            .client
            .get_parameter()
            .name(Self::name(key))
            .with_decryption(true)
            .send()
            .await;

        match out {
            Ok(out) => Ok(out
                .parameter
                .and_then(|p| p.value)
                .unwrap_or_default()),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_parameter_not_found()) => {
                Ok(String::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let out = self
            .client
            .delete_parameter()
            .name(Self::name(key))
            .send()
            .await;

        match out {
            Ok(_) => Ok(()),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_parameter_not_found()) => {
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
