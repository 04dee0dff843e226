use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A tracked site identity. Aliases (twitter.com, x.com) fold into one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalDomain {
    #[serde(rename = "x.com")]
    X,
    #[serde(rename = "reddit.com")]
    Reddit,
    #[serde(rename = "youtube.com")]
    YouTube,
    #[serde(rename = "instagram.com")]
    Instagram,
}

impl CanonicalDomain {
    pub const ALL: [Self; 4] = [Self::X, Self::Reddit, Self::YouTube, Self::Instagram];

    /// Storage key, e.g. `x.com`
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::X => "x.com",
            Self::Reddit => "reddit.com",
            Self::YouTube => "youtube.com",
            Self::Instagram => "instagram.com",
        }
    }

    /// Human-readable site name
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::Reddit => "Reddit",
            Self::YouTube => "YouTube",
            Self::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for CanonicalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Names of the persisted fields of [`UsageState`].
///
/// Each field is stored as its own key so that callers can read and write
/// exactly the subset a transaction depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageField {
    DailyUsageTotal,
    PerSiteUsage,
    CurrentSessionStart,
    CurrentSessionDomain,
    LimitTargetTime,
    LastResetTimestamp,
    NotifiedMilestones,
}

impl UsageField {
    pub const ALL: [Self; 7] = [
        Self::DailyUsageTotal,
        Self::PerSiteUsage,
        Self::CurrentSessionStart,
        Self::CurrentSessionDomain,
        Self::LimitTargetTime,
        Self::LastResetTimestamp,
        Self::NotifiedMilestones,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::DailyUsageTotal => "dailyUsageTotal",
            Self::PerSiteUsage => "perSiteUsage",
            Self::CurrentSessionStart => "currentSessionStart",
            Self::CurrentSessionDomain => "currentSessionDomain",
            Self::LimitTargetTime => "limitTargetTime",
            Self::LastResetTimestamp => "lastResetTimestamp",
            Self::NotifiedMilestones => "notifiedMilestones",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }
}

/// Milliseconds of usage per tracked domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerSiteUsage(BTreeMap<CanonicalDomain, u64>);

impl PerSiteUsage {
    /// All four tracked domains at zero
    #[must_use]
    pub fn zeroed() -> Self {
        Self(CanonicalDomain::ALL.into_iter().map(|d| (d, 0)).collect())
    }

    #[must_use]
    pub fn get(&self, domain: CanonicalDomain) -> u64 {
        self.0.get(&domain).copied().unwrap_or(0)
    }

    pub fn add(&mut self, domain: CanonicalDomain, ms: u64) {
        let entry = self.0.entry(domain).or_insert(0);
        *entry = entry.saturating_add(ms);
    }

    /// Every tracked domain with its usage, including domains never visited
    pub fn iter(&self) -> impl Iterator<Item = (CanonicalDomain, u64)> + '_ {
        CanonicalDomain::ALL.into_iter().map(|d| (d, self.get(d)))
    }
}

impl Default for PerSiteUsage {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// The in-flight accounting interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    pub domain: CanonicalDomain,
    pub start: DateTime<Utc>,
}

/// The complete persisted aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    pub daily_usage_total: u64,
    pub per_site_usage: PerSiteUsage,
    pub current_session_start: Option<DateTime<Utc>>,
    pub current_session_domain: Option<CanonicalDomain>,
    pub limit_target_time: Option<DateTime<Utc>>,
    pub last_reset_timestamp: DateTime<Utc>,
    pub notified_milestones: Vec<u32>,
}

impl UsageState {
    /// Zeroed state for a new day starting at `now`
    #[must_use]
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            daily_usage_total: 0,
            per_site_usage: PerSiteUsage::zeroed(),
            current_session_start: None,
            current_session_domain: None,
            limit_target_time: None,
            last_reset_timestamp: now,
            notified_milestones: Vec::new(),
        }
    }
}

impl From<UsageState> for PartialUsage {
    fn from(state: UsageState) -> Self {
        Self {
            daily_usage_total: Some(state.daily_usage_total),
            per_site_usage: Some(state.per_site_usage),
            current_session_start: Some(state.current_session_start),
            current_session_domain: Some(state.current_session_domain),
            limit_target_time: Some(state.limit_target_time),
            last_reset_timestamp: Some(state.last_reset_timestamp),
            notified_milestones: Some(state.notified_milestones),
        }
    }
}

/// A subset of [`UsageState`] as read from or written to the store.
///
/// The outer `Option` says whether the field is part of this read/write at
/// all. For nullable fields the inner `Option` carries the stored value, so
/// `Some(None)` clears a field while `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialUsage {
    pub daily_usage_total: Option<u64>,
    pub per_site_usage: Option<PerSiteUsage>,
    pub current_session_start: Option<Option<DateTime<Utc>>>,
    pub current_session_domain: Option<Option<CanonicalDomain>>,
    pub limit_target_time: Option<Option<DateTime<Utc>>>,
    pub last_reset_timestamp: Option<DateTime<Utc>>,
    pub notified_milestones: Option<Vec<u32>>,
}

impl PartialUsage {
    #[must_use]
    pub fn daily_usage_total(&self) -> u64 {
        self.daily_usage_total.unwrap_or(0)
    }

    #[must_use]
    pub fn per_site_usage(&self) -> PerSiteUsage {
        self.per_site_usage.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn limit_target_time(&self) -> Option<DateTime<Utc>> {
        self.limit_target_time.flatten()
    }

    #[must_use]
    pub fn notified_milestones(&self) -> Vec<u32> {
        self.notified_milestones.clone().unwrap_or_default()
    }

    /// The open session, if both session fields are present.
    ///
    /// A half-present session can only come from corruption and is treated
    /// as no session at all.
    #[must_use]
    pub fn open_session(&self) -> Option<OpenSession> {
        match (
            self.current_session_start.flatten(),
            self.current_session_domain.flatten(),
        ) {
            (Some(start), Some(domain)) => Some(OpenSession { domain, start }),
            (None, None) => None,
            (start, domain) => {
                log::warn!(
                    "Ignoring half-present session (start: {start:?}, domain: {domain:?})"
                );
                None
            }
        }
    }

    /// Fields carried by this partial, in declaration order
    #[must_use]
    pub fn fields(&self) -> Vec<UsageField> {
        UsageField::ALL
            .into_iter()
            .filter(|field| self.has(*field))
            .collect()
    }

    #[must_use]
    pub fn has(&self, field: UsageField) -> bool {
        match field {
            UsageField::DailyUsageTotal => self.daily_usage_total.is_some(),
            UsageField::PerSiteUsage => self.per_site_usage.is_some(),
            UsageField::CurrentSessionStart => self.current_session_start.is_some(),
            UsageField::CurrentSessionDomain => self.current_session_domain.is_some(),
            UsageField::LimitTargetTime => self.limit_target_time.is_some(),
            UsageField::LastResetTimestamp => self.last_reset_timestamp.is_some(),
            UsageField::NotifiedMilestones => self.notified_milestones.is_some(),
        }
    }

    /// JSON encoding of one field, or `None` if the field is absent
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized
    pub fn encode_field(&self, field: UsageField) -> Result<Option<String>, serde_json::Error> {
        let encoded = match field {
            UsageField::DailyUsageTotal => self.daily_usage_total.as_ref().map(serde_json::to_string),
            UsageField::PerSiteUsage => self.per_site_usage.as_ref().map(serde_json::to_string),
            UsageField::CurrentSessionStart => {
                self.current_session_start.as_ref().map(serde_json::to_string)
            }
            UsageField::CurrentSessionDomain => {
                self.current_session_domain.as_ref().map(serde_json::to_string)
            }
            UsageField::LimitTargetTime => self.limit_target_time.as_ref().map(serde_json::to_string),
            UsageField::LastResetTimestamp => {
                self.last_reset_timestamp.as_ref().map(serde_json::to_string)
            }
            UsageField::NotifiedMilestones => {
                self.notified_milestones.as_ref().map(serde_json::to_string)
            }
        };
        encoded.transpose()
    }

    /// Decode a stored JSON value into `field`
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not a valid encoding for the field
    pub fn decode_field(&mut self, field: UsageField, raw: &str) -> Result<(), serde_json::Error> {
        match field {
            UsageField::DailyUsageTotal => self.daily_usage_total = Some(serde_json::from_str(raw)?),
            UsageField::PerSiteUsage => self.per_site_usage = Some(serde_json::from_str(raw)?),
            UsageField::CurrentSessionStart => {
                self.current_session_start = Some(serde_json::from_str(raw)?);
            }
            UsageField::CurrentSessionDomain => {
                self.current_session_domain = Some(serde_json::from_str(raw)?);
            }
            UsageField::LimitTargetTime => self.limit_target_time = Some(serde_json::from_str(raw)?),
            UsageField::LastResetTimestamp => {
                self.last_reset_timestamp = Some(serde_json::from_str(raw)?);
            }
            UsageField::NotifiedMilestones => {
                self.notified_milestones = Some(serde_json::from_str(raw)?);
            }
        }
        Ok(())
    }

    /// Overwrite every field present in `other`
    pub fn merge(&mut self, other: Self) {
        if other.daily_usage_total.is_some() {
            self.daily_usage_total = other.daily_usage_total;
        }
        if other.per_site_usage.is_some() {
            self.per_site_usage = other.per_site_usage;
        }
        if other.current_session_start.is_some() {
            self.current_session_start = other.current_session_start;
        }
        if other.current_session_domain.is_some() {
            self.current_session_domain = other.current_session_domain;
        }
        if other.limit_target_time.is_some() {
            self.limit_target_time = other.limit_target_time;
        }
        if other.last_reset_timestamp.is_some() {
            self.last_reset_timestamp = other.last_reset_timestamp;
        }
        if other.notified_milestones.is_some() {
            self.notified_milestones = other.notified_milestones;
        }
    }

    /// Copy of only the requested fields
    #[must_use]
    pub fn select(&self, fields: &[UsageField]) -> Self {
        let wants = |field| fields.contains(&field);
        Self {
            daily_usage_total: self
                .daily_usage_total
                .filter(|_| wants(UsageField::DailyUsageTotal)),
            per_site_usage: self
                .per_site_usage
                .clone()
                .filter(|_| wants(UsageField::PerSiteUsage)),
            current_session_start: self
                .current_session_start
                .filter(|_| wants(UsageField::CurrentSessionStart)),
            current_session_domain: self
                .current_session_domain
                .filter(|_| wants(UsageField::CurrentSessionDomain)),
            limit_target_time: self
                .limit_target_time
                .filter(|_| wants(UsageField::LimitTargetTime)),
            last_reset_timestamp: self
                .last_reset_timestamp
                .filter(|_| wants(UsageField::LastResetTimestamp)),
            notified_milestones: self
                .notified_milestones
                .clone()
                .filter(|_| wants(UsageField::NotifiedMilestones)),
        }
    }

    /// Fields of `defaults` that are missing here
    #[must_use]
    pub fn missing_from(&self, defaults: &Self) -> Self {
        let missing: Vec<UsageField> = UsageField::ALL
            .into_iter()
            .filter(|field| !self.has(*field))
            .collect();
        defaults.select(&missing)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}
