//! Recipients of the signed document

use serde::{Deserialize, Serialize};

use crate::error::{Result, SigningError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    #[default]
    Signer,
    Cc,
    Bcc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientEntry {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub role: RecipientRole,
}

impl RecipientEntry {
    /// Trimmed, validated entry
    pub fn new(email: &str, name: &str, role: RecipientRole) -> Result<Self> {
        let email = email.trim().to_string();
        validate_email(&email)?;
        Ok(Self {
            email,
            name: name.trim().to_string(),
            role,
        })
    }

    pub fn signer(email: &str, name: &str) -> Result<Self> {
        Self::new(email, name, RecipientRole::Signer)
    }
}

/// Basic structural check: one `@`, a non-empty local part and a dotted domain
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let invalid = |message: &str| Err(SigningError::validation("email", message));

    if email.len() < 5 {
        return invalid("too short");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return invalid("missing @");
    };
    if local.is_empty() {
        return invalid("missing name before @");
    }
    if domain.contains('@') || email.chars().any(char::is_whitespace) {
        return invalid("unexpected characters");
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return invalid("domain must contain a dot");
    }
    Ok(())
}

/// Ordered recipient list as edited in the signing view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientList {
    entries: Vec<RecipientEntry>,
}

impl RecipientList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the new entry's index
    pub fn add(&mut self, entry: RecipientEntry) -> Result<usize> {
        validate_email(&entry.email)?;
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    pub fn update(&mut self, index: usize, entry: RecipientEntry) -> Result<()> {
        validate_email(&entry.email)?;
        let slot = self.entries.get_mut(index).ok_or_else(|| {
            SigningError::validation("recipient", format!("no recipient at index {}", index))
        })?;
        *slot = entry;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<RecipientEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn entries(&self) -> &[RecipientEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whose name and email are stamped on every signature
    pub fn first_signer(&self) -> Option<&RecipientEntry> {
        self.entries
            .iter()
            .find(|r| r.role == RecipientRole::Signer)
    }
}

impl From<Vec<RecipientEntry>> for RecipientList {
    fn from(entries: Vec<RecipientEntry>) -> Self {
        Self { entries }
    }
}
