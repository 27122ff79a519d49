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

//! Named, typed, optionally-validated value map (4.4). Either free-form
//! (any name/type) or controlled (only pre-declared names, each checked
//! against its criterion).

use crate::error::ValStoreError;
use crate::htable::Htable;
use crate::value::{Value, ValueCriterion, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    FreeForm,
    Controlled,
}

struct Record {
    value: Option<Value>,
    criterion: Option<ValueCriterion>,
}

pub struct ValueStore {
    mode: StoreMode,
    table: Htable<Record>,
}

const TABLE_SIZE: usize = 64;

impl ValueStore {
    pub fn new(mode: StoreMode) -> Self {
        Self {
            mode,
            table: Htable::new(TABLE_SIZE),
        }
    }

    /// Declares a name in a controlled store with no validator beyond the
    /// type check.
    pub fn add_name(&mut self, name: &str, value_type: ValueType, persist: bool) {
        self.add_criterion(name, ValueCriterion::new(value_type, persist));
    }

    pub fn add_name_regexp(
        &mut self,
        name: &str,
        message: &str,
        value_type: ValueType,
        pattern: &str,
        persist: bool,
    ) {
        self.add_criterion(
            name,
            ValueCriterion::new(value_type, persist)
                .with_message(message)
                .with_regex(pattern),
        );
    }

    pub fn add_name_callback(
        &mut self,
        name: &str,
        message: &str,
        value_type: ValueType,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
        persist: bool,
    ) {
        self.add_criterion(
            name,
            ValueCriterion::new(value_type, persist)
                .with_message(message)
                .with_predicate(predicate),
        );
    }

    fn add_criterion(&mut self, name: &str, criterion: ValueCriterion) {
        let key = name.as_bytes().to_vec();
        self.table.replace(
            key,
            Record {
                value: None,
                criterion: Some(criterion),
            },
            |_old| {},
        );
    }

    pub fn delete_name(&mut self, name: &str) {
        let _ = self.table.remove(name.as_bytes());
    }

    /// Controlled-mode validation chain, then insert-or-replace.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ValStoreError> {
        let key = name.as_bytes().to_vec();

        let criterion = self.table.get(&key).and_then(|r| r.criterion.clone());

        match (self.mode, &criterion) {
            (StoreMode::Controlled, None) => {
                return Err(ValStoreError::NoSuchValue {
                    name: name.to_string(),
                })
            }
            (StoreMode::Controlled, Some(c)) => {
                if c.value_type != value.value_type() {
                    return Err(ValStoreError::IncorrectType {
                        name: name.to_string(),
                    });
                }
                if !c.validator.validate(&value) {
                    return Err(match &c.validator {
                        crate::value::Validator::Regex(_) => ValStoreError::FailedRegexp {
                            name: name.to_string(),
                            message: c
                                .message
                                .clone()
                                .unwrap_or_else(|| "failed validation".to_string()),
                        },
                        _ => ValStoreError::FailedCallback {
                            name: name.to_string(),
                        },
                    });
                }
            }
            (StoreMode::FreeForm, _) => {
                if let Some(existing) = self.table.get(&key).and_then(|r| r.value.as_ref()) {
                    if existing.value_type() != value.value_type() {
                        // Free-form mode allows this; just log it.
                        tracing::debug!(
                            name,
                            from = ?existing.value_type(),
                            to = ?value.value_type(),
                            "free-form store: overwriting value with a different type"
                        );
                    }
                }
            }
        }

        self.table.replace(
            key,
            Record {
                value: Some(value),
                criterion,
            },
            |_old| {},
        );
        Ok(())
    }

    pub fn set_number(&mut self, name: &str, n: i32) -> Result<(), ValStoreError> {
        self.set(name, Value::Number(n))
    }

    pub fn set_string(&mut self, name: &str, s: impl Into<String>) -> Result<(), ValStoreError> {
        self.set(name, Value::String(s.into()))
    }

    pub fn set_address(&mut self, name: &str, a: crate::ip::Address) -> Result<(), ValStoreError> {
        self.set(name, Value::Address(a))
    }

    /// Used by config-reload paths: parse `s` into the existing value's
    /// type and `set` it.
    pub fn set_existing(&mut self, name: &str, s: &str) -> Result<(), ValStoreError> {
        let existing_type = self
            .table
            .get(name.as_bytes())
            .and_then(|r| r.value.as_ref().map(|v| v.value_type()).or(r.criterion.as_ref().map(|c| c.value_type)))
            .ok_or_else(|| ValStoreError::NoSuchValue {
                name: name.to_string(),
            })?;
        let value = Value::parse_as(existing_type, s).ok_or_else(|| ValStoreError::FailedRegexp {
            name: name.to_string(),
            message: format!("cannot parse '{s}' as {existing_type:?}"),
        })?;
        self.set(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.table.get(name.as_bytes()).and_then(|r| r.value.as_ref())
    }

    pub fn get_number(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_persist(&self, name: &str) -> bool {
        self.table
            .get(name.as_bytes())
            .and_then(|r| r.criterion.as_ref())
            .map(|c| c.persist)
            .unwrap_or(false)
    }

    /// Iterates `(name, value)` pairs in hash order (4.4). Only yields
    /// names that currently hold a value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.table.iter().filter_map(|(k, r)| {
            r.value
                .as_ref()
                .map(|v| (std::str::from_utf8(k).unwrap_or(""), v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn port_store() -> ValueStore {
        let mut s = ValueStore::new(StoreMode::Controlled);
        s.add_name_regexp(
            "cfg.cmdport",
            "Must be between 0 and 65535",
            ValueType::Number,
            crate::value::criteria::PORT,
            true,
        );
        s
    }

    #[test_case(1234, true; "in range")]
    #[test_case(65535, true; "upper bound")]
    fn port_criterion_accepts(n: i32, should_succeed: bool) {
        let mut s = port_store();
        assert_eq!(s.set_number("cfg.cmdport", n).is_ok(), should_succeed);
    }

    #[test]
    fn port_criterion_rejects_out_of_range_and_leaves_value_unchanged() {
        let mut s = port_store();
        s.set_number("cfg.cmdport", 1234).unwrap();
        let err = s.set_number("cfg.cmdport", 65536).unwrap_err();
        assert!(matches!(err, ValStoreError::FailedRegexp { .. }));
        assert_eq!(s.get_number("cfg.cmdport"), Some(1234));
    }

    #[test]
    fn controlled_store_rejects_wrong_type() {
        let mut s = port_store();
        let err = s.set_string("cfg.cmdport", "abc").unwrap_err();
        assert!(matches!(err, ValStoreError::IncorrectType { .. }));
    }

    #[test]
    fn undeclared_name_fails_in_controlled_store() {
        let mut s = ValueStore::new(StoreMode::Controlled);
        let err = s.set_number("unknown", 1).unwrap_err();
        assert!(matches!(err, ValStoreError::NoSuchValue { .. }));
    }

    #[test]
    fn free_form_store_accepts_any_declared_or_undeclared_name() {
        let mut s = ValueStore::new(StoreMode::FreeForm);
        s.set_number("anything", 42).unwrap();
        assert_eq!(s.get_number("anything"), Some(42));
        // Overwriting with a different type succeeds in free-form mode
        // (just logged).
        s.set_string("anything", "now a string").unwrap();
        assert_eq!(s.get_string("anything"), Some("now a string"));
    }

    #[test]
    fn set_existing_parses_into_declared_type() {
        let mut s = port_store();
        s.set_existing("cfg.cmdport", "10005").unwrap();
        assert_eq!(s.get_number("cfg.cmdport"), Some(10005));
    }

    #[test]
    fn set_existing_on_absent_name_fails() {
        let mut s = ValueStore::new(StoreMode::FreeForm);
        assert!(matches!(
            s.set_existing("nope", "1"),
            Err(ValStoreError::NoSuchValue { .. })
        ));
    }
}
