//! Thin wrappers over the Gmail and Calendar REST APIs.

pub mod calendar;
pub mod client;
pub mod gmail;

pub use calendar::Calendar;
pub use client::GoogleClient;
pub use gmail::Gmail;
