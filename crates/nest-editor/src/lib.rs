//! Editor runtime for Nest diagrams: event bus, state store, undo history,
//! canvas hierarchy, text ↔ visual sync and pointer interaction, composed
//! by [`Engine`].

pub mod bus;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod history;
pub mod input;
pub mod shortcuts;
pub mod store;
pub mod sync;
pub mod tools;

pub use bus::{EventBus, HandlerResult, Payload, ScopedBus, Subscription, Waiter, topics};
pub use engine::{Engine, PumpReport};
pub use error::{BusError, EngineError, EngineResult, HistoryError, StoreError};
pub use hierarchy::Hierarchy;
pub use history::{GroupId, History, HistoryEntry};
pub use input::{InputEvent, Modifiers, PointerButton};
pub use shortcuts::{ShortcutAction, ShortcutMap};
pub use store::{Slice, StatePath, Store, UiPatch};
pub use sync::SyncEngine;
pub use tools::{Intent, Interaction, InteractionState, Mode};
