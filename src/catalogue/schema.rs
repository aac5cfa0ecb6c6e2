use crate::error::DeviceError;
use crate::model::{ParamMap, ParamValue};
use serde::Serialize;

/// Type tag of a declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    FloatOrNone,
    Bool,
    BoolOrNone,
    TupleOfInt,
    TupleOfFloat,
}

impl ParamType {
    /// Whether a value is acceptable for this tag. Ints widen to floats.
    pub fn accepts(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamType::String, ParamValue::Str(_)) => true,
            (ParamType::Int, ParamValue::Int(_)) => true,
            (ParamType::Float, ParamValue::Int(_) | ParamValue::Float(_)) => true,
            (ParamType::FloatOrNone, ParamValue::Int(_) | ParamValue::Float(_) | ParamValue::None) => {
                true
            }
            (ParamType::Bool, ParamValue::Bool(_)) => true,
            (ParamType::BoolOrNone, ParamValue::Bool(_) | ParamValue::None) => true,
            (ParamType::TupleOfInt, ParamValue::IntTuple(_)) => true,
            (ParamType::TupleOfFloat, ParamValue::FloatTuple(_) | ParamValue::IntTuple(_)) => true,
            _ => false,
        }
    }
}

/// Declaration of a single parameter or control
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

/// Check a parameter map against a schema.
///
/// Unknown keys, missing required keys and type mismatches are rejected.
pub fn validate_params(
    owner: &str,
    specs: &[ParamSpec],
    params: &ParamMap,
) -> Result<(), DeviceError> {
    validate_overlay(owner, specs, params)?;

    for spec in specs.iter().filter(|spec| spec.required) {
        if !params.contains_key(spec.name) {
            return Err(DeviceError::InvalidParameter {
                device: owner.to_string(),
                param: spec.name.to_string(),
                details: "required parameter missing".to_string(),
            });
        }
    }

    Ok(())
}

/// Check only the keys present in `params`; required keys may come from elsewhere
pub fn validate_overlay(
    owner: &str,
    specs: &[ParamSpec],
    params: &ParamMap,
) -> Result<(), DeviceError> {
    for (name, value) in params {
        let spec = specs.iter().find(|spec| spec.name == name).ok_or_else(|| {
            DeviceError::InvalidParameter {
                device: owner.to_string(),
                param: name.clone(),
                details: "not declared by the capability type".to_string(),
            }
        })?;

        if !spec.ty.accepts(value) {
            return Err(DeviceError::InvalidParameter {
                device: owner.to_string(),
                param: name.clone(),
                details: format!("expected {:?}, got {}", spec.ty, value),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParamSpec] = &[
        ParamSpec::required("pin", ParamType::Int),
        ParamSpec::optional("active_high", ParamType::Bool),
        ParamSpec::optional("initial_value", ParamType::FloatOrNone),
        ParamSpec::optional("pins", ParamType::TupleOfInt),
    ];

    #[test]
    fn test_accepts_widening() {
        assert!(ParamType::Float.accepts(&ParamValue::Int(3)));
        assert!(!ParamType::Int.accepts(&ParamValue::Float(3.5)));
        assert!(ParamType::BoolOrNone.accepts(&ParamValue::None));
        assert!(!ParamType::Bool.accepts(&ParamValue::None));
        assert!(ParamType::TupleOfFloat.accepts(&ParamValue::IntTuple(vec![1, 2])));
    }

    #[test]
    fn test_validate_params() {
        let mut params = ParamMap::new();
        params.insert("pin".into(), ParamValue::Int(17));
        params.insert("initial_value".into(), ParamValue::None);
        assert!(validate_params("led", SPECS, &params).is_ok());

        params.insert("active_high".into(), ParamValue::Str("yes".into()));
        assert!(validate_params("led", SPECS, &params).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_and_unknown() {
        let params = ParamMap::new();
        let err = validate_params("led", SPECS, &params).unwrap_err();
        assert!(err.to_string().contains("pin"));

        let mut params = ParamMap::new();
        params.insert("pin".into(), ParamValue::Int(4));
        params.insert("colour".into(), ParamValue::Str("red".into()));
        let err = validate_params("led", SPECS, &params).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }
}
