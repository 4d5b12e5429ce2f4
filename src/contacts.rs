use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{SosError, SosResult};

/// Shortest number accepted as an emergency contact, in digits.
pub const MIN_NUMBER_DIGITS: usize = 8;

/// Strip everything but digits. Fails if fewer than `MIN_NUMBER_DIGITS`
/// remain.
pub fn normalize_number(raw: &str) -> SosResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < MIN_NUMBER_DIGITS {
        return Err(SosError::InvalidContact(format!(
            "'{}' has {} digits, need at least {}",
            raw.trim(),
            digits.len(),
            MIN_NUMBER_DIGITS
        )));
    }
    Ok(digits)
}

/// Ordered, deduplicated list of normalized phone numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactList {
    numbers: Vec<String>,
}

impl ContactList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary input, normalizing each entry and silently
    /// dropping invalid ones and repeats.
    pub fn from_numbers<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for raw in numbers {
            match normalize_number(raw.as_ref()) {
                Ok(number) if !list.contains(&number) => list.numbers.push(number),
                Ok(_) => {}
                Err(err) => log::warn!("[CONTACTS] Dropping entry: {}", err),
            }
        }
        list
    }

    /// Add a number, returning its normalized form.
    pub fn add(&mut self, raw: &str) -> SosResult<String> {
        let number = normalize_number(raw)?;
        if self.contains(&number) {
            return Err(SosError::InvalidContact(format!("{} already exists", number)));
        }
        self.numbers.push(number.clone());
        Ok(number)
    }

    pub fn remove(&mut self, index: usize) -> SosResult<String> {
        if index >= self.numbers.len() {
            return Err(SosError::InvalidContact(format!(
                "no contact at position {} (have {})",
                index,
                self.numbers.len()
            )));
        }
        Ok(self.numbers.remove(index))
    }

    pub fn contains(&self, number: &str) -> bool {
        self.numbers.iter().any(|n| n == number)
    }

    pub fn numbers(&self) -> &[String] {
        &self.numbers
    }

    pub fn first(&self) -> Option<&str> {
        self.numbers.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

/// Source of the emergency contact snapshot read at dispatch time.
pub trait ContactStore: Send + Sync {
    fn current_contacts(&self) -> ContactList;
}

#[derive(Default)]
pub struct InMemoryContactStore {
    list: RwLock<ContactList>,
}

impl InMemoryContactStore {
    pub fn new(list: ContactList) -> Self {
        Self {
            list: RwLock::new(list),
        }
    }

    pub fn replace(&self, list: ContactList) {
        if let Ok(mut current) = self.list.write() {
            *current = list;
        }
    }
}

impl ContactStore for InMemoryContactStore {
    fn current_contacts(&self) -> ContactList {
        self.list.read().map(|l| l.clone()).unwrap_or_default()
    }
}

/// Contacts persisted as a JSON array of strings.
pub struct JsonContactStore {
    path: PathBuf,
}

impl JsonContactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty list.
    pub fn load(&self) -> SosResult<ContactList> {
        if !self.path.exists() {
            return Ok(ContactList::new());
        }
        let text = fs::read_to_string(&self.path)?;
        let raw: Vec<String> = serde_json::from_str(&text)?;
        Ok(ContactList::from_numbers(raw))
    }

    pub fn save(&self, list: &ContactList) -> SosResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(list)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl ContactStore for JsonContactStore {
    fn current_contacts(&self) -> ContactList {
        match self.load() {
            Ok(list) => list,
            Err(err) => {
                log::error!(
                    "[CONTACTS] Failed to read {}: {}",
                    self.path.display(),
                    err
                );
                ContactList::new()
            }
        }
    }
}
