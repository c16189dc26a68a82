//! Typed extraction from opaque argument lists.
//!
//! Handlers receive `Vec<serde_json::Value>` and pull positional arguments
//! out through these helpers so every arity or type mismatch becomes a
//! uniform `bad_request` fault.

use serde_json::Value;

use crate::fault::Fault;

/// Positional string argument.
pub fn str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str, Fault> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| Fault::bad_request(format!("argument {idx} ({name}) must be a string")))
}

/// Positional string argument that must be non-empty.
pub fn nonempty_str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str, Fault> {
    let s = str_arg(args, idx, name)?;
    if s.is_empty() {
        return Err(Fault::bad_request(format!(
            "argument {idx} ({name}) must not be empty"
        )));
    }
    Ok(s)
}

/// Positional boolean argument.
pub fn bool_arg(args: &[Value], idx: usize, name: &str) -> Result<bool, Fault> {
    args.get(idx)
        .and_then(Value::as_bool)
        .ok_or_else(|| Fault::bad_request(format!("argument {idx} ({name}) must be a bool")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn str_arg_extracts_in_position() {
        let args = vec![json!("rip4"), json!("rip")];
        assert_eq!(str_arg(&args, 0, "instance").unwrap(), "rip4");
        assert_eq!(str_arg(&args, 1, "class").unwrap(), "rip");
    }

    #[test]
    fn missing_or_mistyped_is_bad_request() {
        let args = vec![json!(7)];
        assert!(str_arg(&args, 0, "instance").is_err());
        assert!(str_arg(&args, 1, "class").is_err());
        assert!(bool_arg(&args, 0, "en").is_err());
    }

    #[test]
    fn nonempty_rejects_empty_string() {
        let args = vec![json!("")];
        let err = nonempty_str_arg(&args, 0, "instance").unwrap_err();
        assert!(err.message.contains("must not be empty"));
    }
}
