use regex::Regex;
use std::sync;

pub static SERVICE_ID: sync::LazyLock<Regex> =
    sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").unwrap());

pub static PLAN_ID: sync::LazyLock<Regex> =
    sync::LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").unwrap());

pub static STACK_NAME_INVALID: sync::LazyLock<Regex> =
    sync::LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9-]+").unwrap());

#[cfg(test)]
#[path = "regex_tests.rs"]
mod tests;
