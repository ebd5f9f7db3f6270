//! The parameter plane
//!
//! Parameters are the slow control path next to the fast byte path:
//! small named typed values owned by a filter (within a stream) or a
//! controller (within an app). Anyone may request a change with `set`;
//! the owner decides what actually happens and publishes the outcome
//! with `push`, which synchronously fans the value out to every
//! registered get-callback. Values are copied in callbacks, never
//! shared.
//!
//! Dispatch never holds the dictionary lock while user callbacks run,
//! so a set-callback may re-enter `push` (the common pattern) without
//! deadlocking. Ownership for re-entrant calls is resolved through the
//! thread-local owner stack in [`super::context`].

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use regex::Regex;

use super::context;
use super::error::{Error, Result};

/// Parameter type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    None,
    Double,
    Uint64,
}

/// A parameter value, passed by copy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    None,
    Double(f64),
    Uint64(u64),
}

impl Value {
    pub fn param_type(&self) -> ParamType {
        match self {
            Value::None => ParamType::None,
            Value::Double(_) => ParamType::Double,
            Value::Uint64(_) => ParamType::Uint64,
        }
    }

    /// Convenience accessor for `Double` values.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Convenience accessor for `Uint64` values.
    pub fn as_uint64(&self) -> Option<u64> {
        match self {
            Value::Uint64(v) => Some(*v),
            _ => None,
        }
    }
}

bitflags! {
    /// Flags for get-callback registration.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GetFlags: u32 {
        /// Keep the callback across stream stop/ready cycles.
        const KEEP_AT_RESTART = 1;
        /// Suppress duplicate registrations of the same callback.
        const KEEP_ONE = 1 << 1;
        /// The name argument is an extended regex.
        const NAME_IS_REGEX = 1 << 2;
    }
}

/// Set-request callback: `(requested value, parameter name)`.
pub type SetFn = dyn Fn(&Value, &str) + Send + Sync;

/// Get (observe) callback: `(pushed value, parameter name)`.
pub type GetFn = dyn Fn(&Value, &str) + Send + Sync;

struct GetEntry {
    cb: Arc<GetFn>,
    flags: GetFlags,
}

struct Parameter {
    ptype: ParamType,
    set_cb: Option<Arc<SetFn>>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
    getters: Vec<GetEntry>,
}

/// What kind of entity owns a parameter dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerKind {
    /// A filter, named within its stream.
    Filter,
    /// A controller, named within the app.
    Controller,
}

/// One owner's parameter dictionary, shared between the app, the
/// scheduler (which stashes it in thread-local state around `input()`),
/// and any thread calling `set`.
pub struct OwnerCell {
    pub(crate) kind: OwnerKind,
    pub(crate) name: String,
    dict: Mutex<BTreeMap<String, Parameter>>,
}

impl OwnerCell {
    pub(crate) fn new(kind: OwnerKind, name: String) -> Arc<Self> {
        Arc::new(Self {
            kind,
            name,
            dict: Mutex::new(BTreeMap::new()),
        })
    }

    /// Owner name (filter or controller name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn create(
        &self,
        name: &str,
        ptype: ParamType,
        set_cb: Option<Arc<SetFn>>,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        let mut dict = self.dict.lock();
        if dict.contains_key(name) {
            return Err(Error::AlreadyExists(format!("{}:{}", self.name, name)).record());
        }
        dict.insert(
            name.to_string(),
            Parameter {
                ptype,
                set_cb,
                cleanup,
                getters: Vec::new(),
            },
        );
        Ok(())
    }

    /// Request a change. Type-checks, then runs the owner's
    /// set-callback synchronously on the calling thread with this owner
    /// on the thread-local stack, so the callback can `push`. A
    /// parameter without a set-callback ignores the request.
    pub fn set(self: &Arc<Self>, name: &str, value: Value) -> Result<()> {
        let cb = {
            let dict = self.dict.lock();
            let param = dict.get(name).ok_or_else(|| {
                Error::Parameter(format!("{}:{} not found", self.name, name)).record()
            })?;
            if param.ptype != value.param_type() {
                return Err(Error::TypeMismatch(format!(
                    "{}:{} is {:?}, got {:?}",
                    self.name,
                    name,
                    param.ptype,
                    value.param_type()
                ))
                .record());
            }
            param.set_cb.clone()
        };
        if let Some(cb) = cb {
            context::with_owner(self.clone(), || cb(&value, name));
        }
        Ok(())
    }

    /// Publish a value to every registered get-callback. Called by the
    /// owner (directly, or through the free [`push`] function from
    /// inside a callback or `input()`). Per-parameter ordering across
    /// pushes is the caller's call order; dispatch is synchronous.
    pub fn push(self: &Arc<Self>, name: &str, value: Value) -> Result<usize> {
        let getters: Vec<Arc<GetFn>> = {
            let dict = self.dict.lock();
            let param = dict.get(name).ok_or_else(|| {
                Error::Parameter(format!("{}:{} not found", self.name, name)).record()
            })?;
            if param.ptype != value.param_type() {
                return Err(Error::TypeMismatch(format!(
                    "{}:{} is {:?}, got {:?}",
                    self.name,
                    name,
                    param.ptype,
                    value.param_type()
                ))
                .record());
            }
            param.getters.iter().map(|g| g.cb.clone()).collect()
        };
        for cb in &getters {
            cb(&value, name);
        }
        Ok(getters.len())
    }

    /// Register a get-callback on `name_or_regex`. Returns how many
    /// parameters the callback was added to.
    pub(crate) fn add_getter(
        &self,
        name_or_regex: &str,
        ptype: Option<ParamType>,
        cb: Arc<GetFn>,
        flags: GetFlags,
    ) -> Result<usize> {
        let re = if flags.contains(GetFlags::NAME_IS_REGEX) {
            Some(Regex::new(name_or_regex).map_err(|e| Error::BadRegex(e.to_string()).record())?)
        } else {
            None
        };

        let mut dict = self.dict.lock();
        let mut added = 0;
        let mut matched = false;
        for (pname, param) in dict.iter_mut() {
            let name_ok = match &re {
                Some(re) => re.is_match(pname),
                None => pname == name_or_regex,
            };
            if !name_ok {
                continue;
            }
            matched = true;
            match ptype {
                Some(t) if t != param.ptype => {
                    if re.is_none() {
                        return Err(Error::TypeMismatch(format!(
                            "{}:{} is {:?}, requested {:?}",
                            self.name, pname, param.ptype, t
                        ))
                        .record());
                    }
                    // Regex registrations just skip parameters of other
                    // types.
                    continue;
                }
                _ => {}
            }
            if flags.contains(GetFlags::KEEP_ONE)
                && param.getters.iter().any(|g| Arc::ptr_eq(&g.cb, &cb))
            {
                continue;
            }
            param.getters.push(GetEntry {
                cb: cb.clone(),
                flags,
            });
            added += 1;
        }
        if !matched && re.is_none() {
            return Err(
                Error::Parameter(format!("{}:{} not found", self.name, name_or_regex)).record(),
            );
        }
        Ok(added)
    }

    /// Drop get-callbacks that were not flagged to survive a restart.
    /// Runs in bulk at stream stop.
    pub(crate) fn purge_getters_for_restart(&self) {
        let mut dict = self.dict.lock();
        for param in dict.values_mut() {
            param
                .getters
                .retain(|g| g.flags.contains(GetFlags::KEEP_AT_RESTART));
        }
    }

    /// Remove parameters by exact name or regex, running their
    /// cleanups. Returns how many were removed.
    pub(crate) fn remove(&self, name_or_regex: &str, is_regex: bool) -> Result<usize> {
        let mut removed = Vec::new();
        {
            let mut dict = self.dict.lock();
            if is_regex {
                let re = Regex::new(name_or_regex)
                    .map_err(|e| Error::BadRegex(e.to_string()).record())?;
                let names: Vec<String> =
                    dict.keys().filter(|n| re.is_match(n)).cloned().collect();
                for n in names {
                    removed.push(dict.remove(&n).expect("key just listed"));
                }
            } else if let Some(p) = dict.remove(name_or_regex) {
                removed.push(p);
            } else {
                return Err(
                    Error::Parameter(format!("{}:{} not found", self.name, name_or_regex))
                        .record(),
                );
            }
        }
        let count = removed.len();
        for mut p in removed {
            if let Some(cleanup) = p.cleanup.take() {
                cleanup();
            }
        }
        Ok(count)
    }

    /// Remove every parameter, running cleanups. Used at owner unload.
    pub(crate) fn destroy_all(&self) {
        let params: Vec<Parameter> = {
            let mut dict = self.dict.lock();
            std::mem::take(&mut *dict).into_values().collect()
        };
        for mut p in params {
            if let Some(cleanup) = p.cleanup.take() {
                cleanup();
            }
        }
    }

    /// Snapshot of `(name, type, getter count)` for iteration and dot
    /// detail output.
    pub(crate) fn list(&self) -> Vec<(String, ParamType, usize)> {
        self.dict
            .lock()
            .iter()
            .map(|(n, p)| (n.clone(), p.ptype, p.getters.len()))
            .collect()
    }
}

/// Publish a value from inside a set-callback, `input()`, or a
/// lifecycle hook: the owner is resolved from the thread-local stack
/// the runtime maintains around those calls.
pub fn push(name: &str, value: Value) -> Result<usize> {
    let owner = context::current_owner().ok_or_else(|| {
        Error::LifecycleMisuse("push() called with no current parameter owner".into()).record()
    })?;
    owner.push(name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn owner() -> Arc<OwnerCell> {
        OwnerCell::new(OwnerKind::Controller, "test-owner".into())
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let o = owner();
        o.create("freq", ParamType::Double, None, None).unwrap();
        let err = o.create("freq", ParamType::Double, None, None);
        assert!(matches!(err, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_set_type_mismatch() {
        let o = owner();
        o.create("freq", ParamType::Double, None, None).unwrap();
        let err = o.set("freq", Value::Uint64(1));
        assert!(matches!(err, Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn test_set_invokes_callback_which_pushes() {
        let o = owner();
        let got = Arc::new(Mutex::new(Vec::new()));

        // The canonical owner pattern: the set-callback accepts the
        // value and re-publishes it with push().
        o.create(
            "freq",
            ParamType::Double,
            Some(Arc::new(|v: &Value, name: &str| {
                push(name, *v).unwrap();
            })),
            None,
        )
        .unwrap();

        let got2 = got.clone();
        o.add_getter(
            "freq",
            Some(ParamType::Double),
            Arc::new(move |v, _| got2.lock().push(*v)),
            GetFlags::empty(),
        )
        .unwrap();

        o.set("freq", Value::Double(42.5)).unwrap();
        assert_eq!(&*got.lock(), &[Value::Double(42.5)]);
    }

    #[test]
    fn test_keep_one_dedupes() {
        let o = owner();
        o.create("a", ParamType::Uint64, None, None).unwrap();
        let cb: Arc<GetFn> = Arc::new(|_, _| {});
        assert_eq!(
            o.add_getter("a", None, cb.clone(), GetFlags::KEEP_ONE).unwrap(),
            1
        );
        assert_eq!(
            o.add_getter("a", None, cb, GetFlags::KEEP_ONE).unwrap(),
            0
        );
    }

    #[test]
    fn test_regex_registration_and_type_skip() {
        let o = owner();
        o.create("gain-left", ParamType::Double, None, None).unwrap();
        o.create("gain-right", ParamType::Double, None, None).unwrap();
        o.create("gain-count", ParamType::Uint64, None, None).unwrap();

        let n = o
            .add_getter(
                "^gain-",
                Some(ParamType::Double),
                Arc::new(|_, _| {}),
                GetFlags::NAME_IS_REGEX,
            )
            .unwrap();
        assert_eq!(n, 2);

        let err = o.add_getter("(", None, Arc::new(|_, _| {}), GetFlags::NAME_IS_REGEX);
        assert!(matches!(err, Err(Error::BadRegex(_))));
    }

    #[test]
    fn test_restart_purge_keeps_flagged() {
        let o = owner();
        o.create("x", ParamType::Uint64, None, None).unwrap();
        o.add_getter("x", None, Arc::new(|_, _| {}), GetFlags::empty())
            .unwrap();
        o.add_getter("x", None, Arc::new(|_, _| {}), GetFlags::KEEP_AT_RESTART)
            .unwrap();

        o.purge_getters_for_restart();
        let list = o.list();
        assert_eq!(list[0].2, 1);
    }

    #[test]
    fn test_remove_by_regex_runs_cleanup() {
        let o = owner();
        let cleaned = Arc::new(AtomicU32::new(0));
        for name in ["tmp-1", "tmp-2", "keep"] {
            let c = cleaned.clone();
            o.create(
                name,
                ParamType::None,
                None,
                Some(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        }
        assert_eq!(o.remove("^tmp-", true).unwrap(), 2);
        assert_eq!(cleaned.load(Ordering::SeqCst), 2);
        assert_eq!(o.list().len(), 1);
    }

    #[test]
    fn test_push_outside_owner_context_fails() {
        let err = push("nope", Value::None);
        assert!(matches!(err, Err(Error::LifecycleMisuse(_))));
    }
}
