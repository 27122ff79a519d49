/*
 *   Copyright (c) 2022 R3BL LLC
 *   All rights reserved.
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! `Value` and `ValueCriterion` — section 3's data model, shared by the
//! free-form and controlled configuration stores (4.4).

use std::sync::Arc;

use regex::Regex;

use crate::ip::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Number,
    String,
    Address,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(i32),
    String(String),
    Address(Address),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Address(_) => ValueType::Address,
        }
    }

    /// Lossless string rendering, used both for validation (criteria run
    /// against this) and for display.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Address(a) => a.render(),
        }
    }

    /// Parses `s` into the given type, the way `set_existing` does: string
    /// unchanged, number via base-0 integer parse, address via the address
    /// parser.
    pub fn parse_as(ty: ValueType, s: &str) -> Option<Value> {
        match ty {
            ValueType::Number => parse_base0_i32(s).map(Value::Number),
            ValueType::String => Some(Value::String(s.to_string())),
            ValueType::Address => Address::parse(s).map(Value::Address),
        }
    }
}

/// Mirrors `iw_util_strtoll`: base 0 means `0x`/`0` prefixes select hex/octal,
/// otherwise decimal; used by `log lvl <bitmask>` and `set_existing` on
/// numeric configuration values.
pub fn parse_base0_i32(s: &str) -> Option<i32> {
    let s = s.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let v = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if s.len() > 1 && s.starts_with('0') {
        i64::from_str_radix(&s[1..], 8).ok()?
    } else {
        s.parse::<i64>().ok()?
    };
    let v = if neg { -v } else { v };
    i32::try_from(v).ok()
}

/// A tagged-variant validator: captures the two disjoint validation paths
/// (predicate callback, compiled regex) without inheritance.
#[derive(Clone)]
pub enum Validator {
    None,
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    Regex(Arc<Regex>),
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validator::None => write!(f, "Validator::None"),
            Validator::Predicate(_) => write!(f, "Validator::Predicate(..)"),
            Validator::Regex(r) => write!(f, "Validator::Regex({r})"),
        }
    }
}

impl Validator {
    /// Validation always runs against the value's string rendering.
    pub fn validate(&self, value: &Value) -> bool {
        match self {
            Validator::None => true,
            Validator::Predicate(f) => f(value),
            Validator::Regex(re) => re.is_match(&value.to_display_string()),
        }
    }
}

/// Attached to a name in a controlled store.
#[derive(Debug, Clone)]
pub struct ValueCriterion {
    pub value_type: ValueType,
    pub persist: bool,
    pub message: Option<String>,
    pub validator: Validator,
}

impl ValueCriterion {
    pub fn new(value_type: ValueType, persist: bool) -> Self {
        Self {
            value_type,
            persist,
            message: None,
            validator: Validator::None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_regex(mut self, pattern: &str) -> Self {
        self.validator = Validator::Regex(Arc::new(
            Regex::new(pattern).expect("criterion regex must compile"),
        ));
        self
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Validator::Predicate(Arc::new(predicate));
        self
    }
}

/// The pre-declared regular-expression shorthands, with the exact
/// patterns from `iw_val_store.h` rather than a placeholder for the
/// port range.
pub mod criteria {
    pub const BOOL: &str = "^[0-1]$";
    pub const CHAR: &str = "^.$";
    pub const PORT: &str =
        "^([0-9]{1,4}|[1-5][0-9]{4}|6[0-4][0-9]{3}|65[0-4][0-9]{2}|655[0-2][0-9]|6553[0-5])$";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_base0_handles_hex_octal_and_decimal() {
        assert_eq!(parse_base0_i32("0xF"), Some(15));
        assert_eq!(parse_base0_i32("010"), Some(8));
        assert_eq!(parse_base0_i32("15"), Some(15));
        assert_eq!(parse_base0_i32("-3"), Some(-3));
    }

    #[test]
    fn port_criterion_rejects_out_of_range() {
        let c = ValueCriterion::new(ValueType::Number, true).with_regex(criteria::PORT);
        assert!(c.validator.validate(&Value::Number(65535)));
        assert!(!c.validator.validate(&Value::Number(65536)));
    }
}
