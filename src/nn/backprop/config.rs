use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use anyhow::Context;
use clnet_device::ExecutionContext;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::{instance, instance_specific, ActivationBackprop, Geometry};
use crate::{
    error::Result,
    nn::{act_funcs, ActivationFunction},
};

fn default_activation() -> String {
    "linear".to_owned()
}

/// Everything needed to build an activation backward pass, apart from the
/// execution context.
///
/// ```json
/// { "num_planes": 3, "input_image_size": 8, "activation": "tanh", "variant": 0 }
/// ```
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(pattern = "owned")]
pub struct BackpropConfig {
    pub num_planes: usize,
    pub input_image_size: usize,
    /// The variant id; the production default when absent.
    #[builder(setter(strip_option), default = "None")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<i32>,
    #[builder(setter(into), default = "default_activation()")]
    #[serde(default = "default_activation")]
    pub activation: String,
}

impl BackpropConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse backprop config")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open backprop config {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse backprop config {}", path.display()))
    }

    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.num_planes, self.input_image_size)
    }

    pub fn activation_function(&self) -> Result<Arc<dyn ActivationFunction>> {
        act_funcs::from_name(&self.activation)
    }

    pub fn instantiate(&self, context: Arc<ExecutionContext>) -> Result<Box<dyn ActivationBackprop>> {
        let activation = self.activation_function()?;
        match self.variant {
            Some(id) => instance_specific(
                id,
                context,
                self.num_planes,
                self.input_image_size,
                activation,
            ),
            None => instance(context, self.num_planes, self.input_image_size, activation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::BackpropError, nn::Variant};

    #[test]
    fn builder_test() {
        let config = BackpropConfigBuilder::default()
            .num_planes(3)
            .input_image_size(8)
            .build()
            .unwrap();
        assert_eq!(config.variant, None);
        assert_eq!(config.activation, "linear");
        assert_eq!(config.geometry().unwrap().input_size(5), 960);

        let config = BackpropConfigBuilder::default()
            .num_planes(1)
            .input_image_size(2)
            .variant(0)
            .activation("relu")
            .build()
            .unwrap();
        assert_eq!(config.variant, Some(0));
        assert_eq!(config.activation_function().unwrap().name(), "relu");

        assert!(BackpropConfigBuilder::default().num_planes(1).build().is_err());
    }

    #[test]
    fn json_test() {
        let config = BackpropConfig::from_json_str(r#"{ "num_planes": 2, "input_image_size": 4 }"#)
            .unwrap();
        assert_eq!(config.variant, None);
        assert_eq!(config.activation, "linear");

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("variant"));
        assert_eq!(BackpropConfig::from_json_str(&json).unwrap(), config);

        assert!(BackpropConfig::from_json_str(r#"{ "num_planes": 2 }"#).is_err());
    }

    #[test]
    fn instantiate_test() {
        let context = Arc::new(ExecutionContext::ndarray());
        let config = BackpropConfig::from_json_str(
            r#"{ "num_planes": 2, "input_image_size": 4, "activation": "tanh", "variant": 0 }"#,
        )
        .unwrap();
        let backprop = config.instantiate(context.clone()).unwrap();
        assert_eq!(backprop.variant(), Some(Variant::Cpu));
        assert_eq!(backprop.activation().name(), "tanh");

        let config = BackpropConfig {
            variant: None,
            ..config
        };
        let backprop = config.instantiate(context.clone()).unwrap();
        assert_eq!(backprop.variant(), Some(Variant::DEFAULT));

        let config = BackpropConfig {
            variant: Some(5),
            ..config
        };
        assert!(matches!(
            config.instantiate(context.clone()),
            Err(BackpropError::UnknownVariant(5))
        ));

        let config = BackpropConfig {
            variant: None,
            activation: "swish".to_owned(),
            ..config
        };
        assert!(matches!(
            config.instantiate(context),
            Err(BackpropError::UnknownActivation(_))
        ));
    }
}
