use std::time::Duration;

use crate::key::StateKey;

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOp {
    Set {
        key: StateKey,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: StateKey,
    },
    Increment {
        key: StateKey,
        delta: i64,
    },
    SetAdd {
        set: StateKey,
        member: String,
    },
    SetRemove {
        set: StateKey,
        member: String,
    },
}

/// An ordered list of writes applied all-or-nothing by
/// [`StateStore::execute`](crate::StateStore::execute).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<StateOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, key: StateKey, value: impl Into<String>, ttl: Option<Duration>) -> Self {
        self.ops.push(StateOp::Set {
            key,
            value: value.into(),
            ttl,
        });
        self
    }

    #[must_use]
    pub fn delete(mut self, key: StateKey) -> Self {
        self.ops.push(StateOp::Delete { key });
        self
    }

    #[must_use]
    pub fn increment(mut self, key: StateKey, delta: i64) -> Self {
        self.ops.push(StateOp::Increment { key, delta });
        self
    }

    #[must_use]
    pub fn set_add(mut self, set: StateKey, member: impl Into<String>) -> Self {
        self.ops.push(StateOp::SetAdd {
            set,
            member: member.into(),
        });
        self
    }

    #[must_use]
    pub fn set_remove(mut self, set: StateKey, member: impl Into<String>) -> Self {
        self.ops.push(StateOp::SetRemove {
            set,
            member: member.into(),
        });
        self
    }

    /// Append a single operation.
    pub fn push(&mut self, op: StateOp) {
        self.ops.push(op);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn ops(&self) -> &[StateOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<StateOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyKind;

    #[test]
    fn builder_preserves_order() {
        let set = StateKey::new(KeyKind::Index, "violations");
        let key = StateKey::new(KeyKind::Cache, "a");
        let batch = WriteBatch::new()
            .set(key.clone(), "doc", Some(Duration::from_secs(10)))
            .set_add(set.clone(), key.canonical())
            .increment(StateKey::new(KeyKind::Service, "1/version"), 1);

        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[0], StateOp::Set { .. }));
        assert!(matches!(batch.ops()[1], StateOp::SetAdd { .. }));
        assert!(matches!(batch.ops()[2], StateOp::Increment { delta: 1, .. }));
    }

    #[test]
    fn empty_batch() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert!(batch.into_ops().is_empty());
    }
}
