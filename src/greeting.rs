//! Session-opening greeting
//!
//! The tutor greets the student automatically on the first voice-mode entry
//! of each local calendar day. Which greeting is spoken is a pluggable
//! strategy so tests can pin it down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use rand::seq::SliceRandom;

use crate::Result;
use crate::backend::CourseContext;

/// Greeting templates; `{course}` is replaced with the course name
const GREETING_TEMPLATES: &[&str] = &[
    "Hi there! Ready to dive into {course}? Ask me anything.",
    "Welcome back! What would you like to go over in {course} today?",
    "Hello! I'm here to help you study {course}. What's on your mind?",
    "Hey! Let's make some progress on {course}. Where should we start?",
];

/// Used when the course has no display name
const FALLBACK_COURSE_NAME: &str = "your course";

/// All greeting texts that may be spoken for a course
#[must_use]
pub fn greeting_variants(course: &CourseContext) -> Vec<String> {
    let name = course
        .course_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(FALLBACK_COURSE_NAME);

    GREETING_TEMPLATES
        .iter()
        .map(|t| t.replace("{course}", name))
        .collect()
}

/// Chooses which greeting text to speak
pub trait GreetingPicker: Send + Sync {
    /// Pick one of [`greeting_variants`] for the course
    fn pick(&self, course: &CourseContext) -> String;
}

/// Picks a greeting uniformly at random
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomGreeting;

impl GreetingPicker for RandomGreeting {
    fn pick(&self, course: &CourseContext) -> String {
        let variants = greeting_variants(course);
        variants
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }
}

/// Always picks the same variant (index wraps around)
#[derive(Debug, Clone, Copy)]
pub struct FixedGreeting(pub usize);

impl GreetingPicker for FixedGreeting {
    fn pick(&self, course: &CourseContext) -> String {
        let variants = greeting_variants(course);
        variants[self.0 % variants.len()].clone()
    }
}

/// Source of the local calendar date
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock local date
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Durable record of the last day each user was greeted
pub trait GreetingLedger: Send + Sync {
    /// Date of the last greeting for `user_id`, if any
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot be read
    fn last_greeted(&self, user_id: &str) -> Result<Option<NaiveDate>>;

    /// Record that `user_id` was greeted on `date`
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot be written
    fn record_greeting(&self, user_id: &str, date: NaiveDate) -> Result<()>;
}

/// In-process ledger, for tests and ephemeral shells
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    entries: Arc<Mutex<HashMap<String, NaiveDate>>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GreetingLedger for MemoryLedger {
    fn last_greeted(&self, user_id: &str) -> Result<Option<NaiveDate>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(user_id).copied())
    }

    fn record_greeting(&self, user_id: &str, date: NaiveDate) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_string(), date);
        Ok(())
    }
}

/// Once-per-day greeting gate for one user
#[derive(Clone)]
pub struct GreetingGate {
    ledger: Arc<dyn GreetingLedger>,
    clock: Arc<dyn Clock>,
    user_id: String,
}

impl GreetingGate {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn GreetingLedger>,
        clock: Arc<dyn Clock>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            clock,
            user_id: user_id.into(),
        }
    }

    /// Whether today's first entry is still ahead
    ///
    /// An unreadable ledger greets rather than silently skipping.
    #[must_use]
    pub fn should_greet(&self) -> bool {
        let today = self.clock.today();
        match self.ledger.last_greeted(&self.user_id) {
            Ok(last) => last != Some(today),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %self.user_id, "greeting ledger unreadable");
                true
            }
        }
    }

    /// Record today's greeting
    pub fn mark_greeted(&self) {
        let today = self.clock.today();
        if let Err(e) = self.ledger.record_greeting(&self.user_id, today) {
            tracing::warn!(error = %e, user_id = %self.user_id, "failed to record greeting");
        }
    }
}
