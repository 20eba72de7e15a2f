use std::cell::RefCell;

/// Ambient value with stack discipline: `scoped` installs a value for the
/// duration of a closure and always puts the previous one back.
#[derive(Debug)]
pub(crate) struct ScopedSlot<T> {
    value: RefCell<Option<T>>,
}

impl<T> Default for ScopedSlot<T> {
    fn default() -> Self {
        Self {
            value: RefCell::new(None),
        }
    }
}

impl<T: Clone> ScopedSlot<T> {
    pub(crate) fn get(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    pub(crate) fn scoped<R>(&self, value: T, body: impl FnOnce() -> R) -> R {
        let previous = self.value.replace(Some(value));
        let _restore = RestoreOnDrop {
            slot: &self.value,
            previous: Some(previous),
        };
        body()
    }
}

struct RestoreOnDrop<'a, T> {
    slot: &'a RefCell<Option<T>>,
    previous: Option<Option<T>>,
}

impl<T> Drop for RestoreOnDrop<'_, T> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.slot.borrow_mut() = previous;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CurrentUnit {
    pub(crate) section_id: i64,
    pub(crate) label: String,
}

#[derive(Debug, Default)]
pub(crate) struct AmbientContext {
    pub(crate) current_phase: ScopedSlot<&'static str>,
    pub(crate) current_unit: ScopedSlot<CurrentUnit>,
}

impl AmbientContext {
    /// `phase section` prefix for messages raised below the orchestrator.
    pub(crate) fn describe(&self) -> String {
        let phase = self.current_phase.get().unwrap_or("ingest");
        match self.current_unit.get() {
            Some(unit) => format!("{phase} {}", unit.label),
            None => phase.to_string(),
        }
    }
}
