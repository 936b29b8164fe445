//! Model registry: register and look up model parameters by ID.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::InferError;
use crate::params::ModelParams;

/// Identifies a built-in model.
pub struct ModelId;

impl ModelId {
    /// MNIST handwritten digit classifier.
    /// Input: `Input3` [1, 1, 28, 28] float32
    /// Output: `Plus214_Output_0` [1, 10] float32 (logits)
    pub const MNIST: &str = "mnist";
}

static REGISTRY: Lazy<Mutex<HashMap<String, ModelParams>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers (or replaces) the parameters for `id`.
pub fn register_model(id: &str, params: ModelParams) {
    REGISTRY.lock().insert(id.to_string(), params);
}

/// Returns a copy of the parameters registered for `id`.
pub fn model_params(id: &str) -> Result<ModelParams, InferError> {
    REGISTRY
        .lock()
        .get(id)
        .cloned()
        .ok_or_else(|| InferError::ModelNotRegistered(id.to_string()))
}

/// Returns the IDs of all registered models, sorted.
pub fn list_models() -> Vec<String> {
    let mut ids: Vec<String> = REGISTRY.lock().keys().cloned().collect();
    ids.sort();
    ids
}

pub fn is_registered(id: &str) -> bool {
    REGISTRY.lock().contains_key(id)
}

/// Registers every built-in model.
pub fn register_builtin_models() {
    register_model(ModelId::MNIST, ModelParams::mnist());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_mnist() {
        register_builtin_models();
        assert!(is_registered(ModelId::MNIST));
        assert!(list_models().contains(&ModelId::MNIST.to_string()));
        assert_eq!(model_params(ModelId::MNIST).unwrap(), ModelParams::mnist());
    }

    #[test]
    fn register_and_replace() {
        let mut p = ModelParams::mnist();
        p.fp16 = true;
        register_model("test-register-replace", p);
        assert!(model_params("test-register-replace").unwrap().fp16);

        register_model("test-register-replace", ModelParams::default());
        assert!(!model_params("test-register-replace").unwrap().fp16);
    }

    #[test]
    fn unknown_model() {
        assert!(!is_registered("no-such-model"));
        assert!(matches!(
            model_params("no-such-model"),
            Err(InferError::ModelNotRegistered(id)) if id == "no-such-model"
        ));
    }
}
