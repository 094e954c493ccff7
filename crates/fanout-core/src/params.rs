//! Named parameter store.
//!
//! A core-scoped `name → value` map where each value is one of four kinds:
//! int, bool, float, or string. Kinds are sticky: the first `set` binds the
//! name to its kind, and any later `set`/`swap` of a different kind fails
//! with a type mismatch. There is no unset.
//!
//! Locking is two-level: a read-mostly outer map from name to slot, and a
//! per-name `RwLock` around the value, so `swap` on one name never contends
//! with reads of another. `swap` holds the per-name write lock across the
//! exchange, which makes it atomic for scalars and serialized for strings.

use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::Error;

// ---------------------------------------------------------------------------
// ParamValue / ParamKind
// ---------------------------------------------------------------------------

/// A parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// 64-bit signed integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
}

impl ParamValue {
    /// The kind of this value.
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Int(_) => ParamKind::Int,
            Self::Bool(_) => ParamKind::Bool,
            Self::Float(_) => ParamKind::Float,
            Self::Str(_) => ParamKind::Str,
        }
    }
}

/// The kind a parameter name is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    Str,
}

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

type Slot = Arc<RwLock<ParamValue>>;

/// Core-scoped parameter map with sticky kinds.
#[derive(Default)]
pub struct ParameterStore {
    names: RwLock<FxHashMap<String, Slot>>,
}

impl ParameterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            names: RwLock::new(FxHashMap::default()),
        }
    }

    /// The kind `name` is bound to.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the name is unbound.
    pub fn kind_of(&self, name: &str) -> Result<ParamKind, Error> {
        let slot = self.slot(name)?;
        let kind = slot.read().kind();
        Ok(kind)
    }

    /// Binds `name` to `value`, or updates it if already bound to the same
    /// kind.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] if the name is bound to a different kind.
    pub fn set(&self, name: &str, value: ParamValue) -> Result<(), Error> {
        if let Some(slot) = self.names.read().get(name) {
            let mut current = slot.write();
            if current.kind() != value.kind() {
                return Err(Error::TypeMismatch);
            }
            *current = value;
            return Ok(());
        }

        let mut names = self.names.write();
        // A racing set may have bound the name between the locks.
        match names.get(name) {
            Some(slot) => {
                let mut current = slot.write();
                if current.kind() != value.kind() {
                    return Err(Error::TypeMismatch);
                }
                *current = value;
            }
            None => {
                names.insert(name.to_owned(), Arc::new(RwLock::new(value)));
            }
        }

        Ok(())
    }

    /// Reads the value bound to `name`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the name is unbound.
    pub fn get(&self, name: &str) -> Result<ParamValue, Error> {
        let slot = self.slot(name)?;
        let value = slot.read().clone();
        Ok(value)
    }

    /// Replaces the value bound to `name`, returning the prior value.
    ///
    /// The exchange happens under the per-name write lock: no concurrent
    /// reader or writer observes an intermediate state.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the name is unbound, [`Error::TypeMismatch`]
    /// if `value` is of a different kind than the binding.
    pub fn swap(&self, name: &str, value: ParamValue) -> Result<ParamValue, Error> {
        let slot = self.slot(name)?;
        let mut current = slot.write();

        if current.kind() != value.kind() {
            return Err(Error::TypeMismatch);
        }

        Ok(std::mem::replace(&mut *current, value))
    }

    /// Number of bound names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    /// Whether no names are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    fn slot(&self, name: &str) -> Result<Slot, Error> {
        self.names.read().get(name).cloned().ok_or(Error::NotFound)
    }

    // --- typed convenience accessors -----------------------------------

    /// `set` for ints.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn set_int(&self, name: &str, value: i64) -> Result<(), Error> {
        self.set(name, ParamValue::Int(value))
    }

    /// `get` for ints.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if unbound, [`Error::TypeMismatch`] if bound to
    /// another kind.
    pub fn get_int(&self, name: &str) -> Result<i64, Error> {
        match self.get(name)? {
            ParamValue::Int(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// `swap` for ints.
    ///
    /// # Errors
    ///
    /// See [`swap`](Self::swap).
    pub fn swap_int(&self, name: &str, value: i64) -> Result<i64, Error> {
        match self.swap(name, ParamValue::Int(value))? {
            ParamValue::Int(v) => Ok(v),
            // swap checked the kind before exchanging.
            _ => unreachable!("kind checked by swap"),
        }
    }

    /// `set` for bools.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn set_bool(&self, name: &str, value: bool) -> Result<(), Error> {
        self.set(name, ParamValue::Bool(value))
    }

    /// `get` for bools.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if unbound, [`Error::TypeMismatch`] if bound to
    /// another kind.
    pub fn get_bool(&self, name: &str) -> Result<bool, Error> {
        match self.get(name)? {
            ParamValue::Bool(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// `swap` for bools.
    ///
    /// # Errors
    ///
    /// See [`swap`](Self::swap).
    pub fn swap_bool(&self, name: &str, value: bool) -> Result<bool, Error> {
        match self.swap(name, ParamValue::Bool(value))? {
            ParamValue::Bool(v) => Ok(v),
            _ => unreachable!("kind checked by swap"),
        }
    }

    /// `set` for floats.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn set_float(&self, name: &str, value: f64) -> Result<(), Error> {
        self.set(name, ParamValue::Float(value))
    }

    /// `get` for floats.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if unbound, [`Error::TypeMismatch`] if bound to
    /// another kind.
    pub fn get_float(&self, name: &str) -> Result<f64, Error> {
        match self.get(name)? {
            ParamValue::Float(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// `swap` for floats.
    ///
    /// # Errors
    ///
    /// See [`swap`](Self::swap).
    pub fn swap_float(&self, name: &str, value: f64) -> Result<f64, Error> {
        match self.swap(name, ParamValue::Float(value))? {
            ParamValue::Float(v) => Ok(v),
            _ => unreachable!("kind checked by swap"),
        }
    }

    /// `set` for strings.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn set_str(&self, name: &str, value: impl Into<String>) -> Result<(), Error> {
        self.set(name, ParamValue::Str(value.into()))
    }

    /// `get` for strings.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if unbound, [`Error::TypeMismatch`] if bound to
    /// another kind.
    pub fn get_str(&self, name: &str) -> Result<String, Error> {
        match self.get(name)? {
            ParamValue::Str(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// `swap` for strings.
    ///
    /// # Errors
    ///
    /// See [`swap`](Self::swap).
    pub fn swap_str(&self, name: &str, value: impl Into<String>) -> Result<String, Error> {
        match self.swap(name, ParamValue::Str(value.into()))? {
            ParamValue::Str(v) => Ok(v),
            _ => unreachable!("kind checked by swap"),
        }
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("names", &self.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // --- Round-trip tests ---

    #[test]
    fn test_set_get_round_trip_each_kind() {
        let store = ParameterStore::new();

        store.set_int("i", 5).unwrap();
        store.set_bool("b", true).unwrap();
        store.set_float("f", 2.5).unwrap();
        store.set_str("s", "hello").unwrap();

        assert_eq!(store.get_int("i").unwrap(), 5);
        assert!(store.get_bool("b").unwrap());
        assert!((store.get_float("f").unwrap() - 2.5).abs() < f64::EPSILON);
        assert_eq!(store.get_str("s").unwrap(), "hello");
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_set_overwrites_same_kind() {
        let store = ParameterStore::new();
        store.set_int("x", 1).unwrap();
        store.set_int("x", 2).unwrap();
        assert_eq!(store.get_int("x").unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    // --- Swap tests ---

    #[test]
    fn test_swap_returns_prior_value() {
        let store = ParameterStore::new();
        store.set_int("x", 5).unwrap();

        let observed = store.get_int("x").unwrap();
        let prior = store.swap_int("x", 7).unwrap();

        assert_eq!(prior, observed);
        assert_eq!(store.get_int("x").unwrap(), 7);
    }

    #[test]
    fn test_swap_unbound_is_not_found() {
        let store = ParameterStore::new();
        assert!(matches!(store.swap_int("x", 1), Err(Error::NotFound)));
    }

    #[test]
    fn test_swap_wrong_kind_is_mismatch() {
        let store = ParameterStore::new();
        store.set_str("x", "v").unwrap();
        assert!(matches!(store.swap_int("x", 1), Err(Error::TypeMismatch)));
        // Binding untouched.
        assert_eq!(store.get_str("x").unwrap(), "v");
    }

    // --- Stickiness tests ---

    #[test]
    fn test_kind_is_sticky() {
        let store = ParameterStore::new();
        store.set_int("x", 5).unwrap();

        assert!(matches!(store.set_bool("x", true), Err(Error::TypeMismatch)));
        assert!(matches!(store.set_float("x", 1.0), Err(Error::TypeMismatch)));
        assert!(matches!(store.set_str("x", "s"), Err(Error::TypeMismatch)));

        assert_eq!(store.get_int("x").unwrap(), 5);
        assert_eq!(store.kind_of("x").unwrap(), ParamKind::Int);
    }

    #[test]
    fn test_get_wrong_kind_is_mismatch() {
        let store = ParameterStore::new();
        store.set_int("x", 5).unwrap();
        assert!(matches!(store.get_str("x"), Err(Error::TypeMismatch)));
    }

    // --- Missing-name tests ---

    #[test]
    fn test_unbound_name_is_not_found() {
        let store = ParameterStore::new();
        assert!(matches!(store.get_str("y"), Err(Error::NotFound)));
        assert!(matches!(store.kind_of("y"), Err(Error::NotFound)));
    }

    // --- Concurrency tests ---

    #[test]
    fn test_concurrent_swaps_exchange_every_value_once() {
        let store = Arc::new(ParameterStore::new());
        store.set_int("x", 0).unwrap();

        let mut handles = Vec::new();
        for t in 1..=4i64 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                for i in 0..100 {
                    seen.push(store.swap_int("x", t * 1000 + i).unwrap());
                }
                seen
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.push(store.get_int("x").unwrap());

        // Every value written (plus the initial 0) was observed exactly once.
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 401);
    }

    #[test]
    fn test_concurrent_distinct_names_do_not_interfere() {
        let store = Arc::new(ParameterStore::new());
        let mut handles = Vec::new();

        for t in 0..4i64 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let name = format!("p{t}");
                for i in 0..200 {
                    store.set_int(&name, i).unwrap();
                    assert_eq!(store.get_int(&name).unwrap(), i);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 4);
    }
}
