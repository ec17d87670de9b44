//! # Form Surface Module
//!
//! The narrow, in-process contract a bizobj offers to a UI form: an event
//! type for row and value changes plus the subscriber plumbing. The form
//! side stays entirely outside this crate; it only registers callbacks
//! and calls the bizobj's public operations.

// ============================================================================
// Events
// ============================================================================

/// Notifications a bizobj emits to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum BizEvent {
    /// The current row changed: navigation, requery, new or delete.
    /// `row` is the new pointer (-1 when the set emptied).
    RowChanged { row: i64 },
    /// A field on the given row was written through `set_field_value`.
    ValueChanged { row: i64, field: String },
}

/// A subscriber callback. Kept `Send + Sync` so a bizobj stays movable
/// across task spawns even though one logical task drives it.
pub type Listener = Box<dyn Fn(&BizEvent) + Send + Sync>;

/// Subscriber list; owned by each bizobj.
#[derive(Default)]
pub struct Notifier {
    listeners: Vec<Listener>,
}

impl Notifier {
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    pub fn notify(&self, event: &BizEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
