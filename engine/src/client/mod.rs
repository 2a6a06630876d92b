//! Client session controller.
//!
//! A thin, revalidating observer of the server: it drives the booking wizard,
//! mirrors the hold with an advisory countdown, caches enough state to resume
//! after a reload, and resynchronizes whenever it may have missed updates.

pub mod backend;
pub mod cache;
pub mod controller;

pub use backend::{BackendError, BookingBackend, LocalBackend};
pub use cache::{CacheError, InMemorySessionCache, JsonFileSessionCache, PersistedBooking, SessionCache};
pub use controller::{BookingController, ControllerError, ControllerNotice, Countdown, WizardStep};
