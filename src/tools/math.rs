//! Arithmetic tools.

use super::Tool;
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Compute `n!`.
pub fn factorial(n: i64) -> Result<u128> {
    if n < 0 {
        return Err(TroupeError::InvalidArgument(format!(
            "Factorial is not defined for negative numbers (got {})",
            n
        )));
    }
    (1..=n as u128).try_fold(1u128, |acc, k| acc.checked_mul(k)).ok_or_else(|| {
        TroupeError::InvalidArgument(format!("Factorial of {} does not fit in 128 bits", n))
    })
}

/// Exposes [`factorial`] to the model.
pub struct FactorialTool;

#[async_trait]
impl Tool for FactorialTool {
    fn name(&self) -> &str {
        "factorial"
    }

    fn description(&self) -> &str {
        "Calculate the factorial of a non-negative integer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "n": {
                    "type": "integer",
                    "description": "The number to compute the factorial of"
                }
            },
            "required": ["n"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let n = args
            .get("n")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| TroupeError::InvalidArgument("Missing integer 'n' argument".to_string()))?;
        Ok(factorial(n)?.to_string())
    }
}
