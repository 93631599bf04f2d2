//! HTTP/2 settings management
//!
//! This module implements HTTP/2 SETTINGS parameters as defined in
//! RFC 7540 Section 6.5 and the three registries a connection keeps:
//! the values we honor, the values we proposed and await an ACK for,
//! and the peer's values.

use super::error::{Error, Result};
use super::frames::{Frame, SettingsFrame};
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    /// Allows the sender to inform the remote endpoint of the maximum size
    /// of the header compression table
    HeaderTableSize = 0x1,

    /// SETTINGS_ENABLE_PUSH (0x2)
    /// Used to disable server push
    EnablePush = 0x2,

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    /// Indicates the maximum number of concurrent streams
    MaxConcurrentStreams = 0x3,

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    /// Indicates the sender's initial window size for stream-level flow control
    InitialWindowSize = 0x4,

    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    /// Indicates the size of the largest frame payload
    MaxFrameSize = 0x5,

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    /// Advises peer of the maximum size of header list
    MaxHeaderListSize = 0x6,

    /// SETTINGS_ENABLE_CONNECT_PROTOCOL (0x8) - RFC 8441
    /// Enables support for CONNECT requests with the :protocol pseudo-header
    EnableConnectProtocol = 0x8,
}

impl SettingsParameter {
    /// All known parameters, in registry order
    pub const ALL: [SettingsParameter; 7] = [
        SettingsParameter::HeaderTableSize,
        SettingsParameter::EnablePush,
        SettingsParameter::MaxConcurrentStreams,
        SettingsParameter::InitialWindowSize,
        SettingsParameter::MaxFrameSize,
        SettingsParameter::MaxHeaderListSize,
        SettingsParameter::EnableConnectProtocol,
    ];

    /// Convert to u16
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Create from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            0x8 => Some(SettingsParameter::EnableConnectProtocol),
            _ => None,
        }
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
            SettingsParameter::EnableConnectProtocol => "ENABLE_CONNECT_PROTOCOL",
        }
    }

    /// Protocol default (RFC 7540 Section 6.5.2). Unlimited values are `u32::MAX`.
    pub fn default_value(&self) -> u32 {
        match self {
            SettingsParameter::HeaderTableSize => DEFAULT_HEADER_TABLE_SIZE,
            SettingsParameter::EnablePush => 1,
            SettingsParameter::MaxConcurrentStreams => u32::MAX,
            SettingsParameter::InitialWindowSize => DEFAULT_INITIAL_WINDOW_SIZE,
            SettingsParameter::MaxFrameSize => DEFAULT_MAX_FRAME_SIZE,
            SettingsParameter::MaxHeaderListSize => u32::MAX,
            SettingsParameter::EnableConnectProtocol => 0,
        }
    }

    /// Check a value against the protocol's range for this parameter
    pub fn validate(&self, value: u32) -> Result<()> {
        match self {
            SettingsParameter::EnablePush | SettingsParameter::EnableConnectProtocol if value > 1 => {
                Err(Error::InvalidSettings(format!("{} must be 0 or 1, got {}", self.name(), value)))
            }
            SettingsParameter::InitialWindowSize if value > 0x7FFF_FFFF => Err(Error::FlowControl(
                format!("Initial window size {} exceeds maximum (2^31-1)", value),
            )),
            SettingsParameter::MaxFrameSize if !(16384..=16_777_215).contains(&value) => {
                Err(Error::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    value
                )))
            }
            _ => Ok(()),
        }
    }

    fn index(&self) -> usize {
        match self {
            SettingsParameter::HeaderTableSize => 0,
            SettingsParameter::EnablePush => 1,
            SettingsParameter::MaxConcurrentStreams => 2,
            SettingsParameter::InitialWindowSize => 3,
            SettingsParameter::MaxFrameSize => 4,
            SettingsParameter::MaxHeaderListSize => 5,
            SettingsParameter::EnableConnectProtocol => 6,
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// One applied settings change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingChange {
    /// Parameter that changed
    pub param: SettingsParameter,
    /// Previous value
    pub old: u32,
    /// New value
    pub new: u32,
}

/// A map of every known setting to its value, with change tracking
#[derive(Debug, Clone)]
pub struct SettingsRegistry {
    values: [u32; 7],
    changed: [bool; 7],
}

impl SettingsRegistry {
    /// Registry holding the protocol defaults, nothing marked changed
    pub fn new() -> Self {
        let mut values = [0u32; 7];
        for param in SettingsParameter::ALL {
            values[param.index()] = param.default_value();
        }
        SettingsRegistry {
            values,
            changed: [false; 7],
        }
    }

    /// Current value of a setting
    pub fn get(&self, param: SettingsParameter) -> u32 {
        self.values[param.index()]
    }

    /// Set a value. Returns false (and records nothing) when unchanged.
    pub fn set(&mut self, param: SettingsParameter, value: u32) -> bool {
        let idx = param.index();
        if self.values[idx] == value {
            return false;
        }
        self.values[idx] = value;
        self.changed[idx] = true;
        true
    }

    /// Apply a list of received values, returning what actually changed.
    /// Merged values are not marked for the next `build_frame`.
    pub fn merge(&mut self, settings: &[(SettingsParameter, u32)]) -> Vec<SettingChange> {
        let mut changes = Vec::new();
        for &(param, value) in settings {
            let idx = param.index();
            let old = self.values[idx];
            if old != value {
                self.values[idx] = value;
                changes.push(SettingChange { param, old, new: value });
            }
        }
        changes
    }

    /// Whether any value changed since the last `build_frame`
    pub fn is_changed(&self) -> bool {
        self.changed.iter().any(|c| *c)
    }

    /// Values changed since the last call, clearing the changed flags
    pub fn take_changes(&mut self) -> Vec<(SettingsParameter, u32)> {
        let mut settings = Vec::new();
        for param in SettingsParameter::ALL {
            let idx = param.index();
            if self.changed[idx] {
                settings.push((param, self.values[idx]));
                self.changed[idx] = false;
            }
        }
        settings
    }

    /// Build a SETTINGS frame carrying only the values changed since the
    /// last build, and clear the changed flags.
    pub fn build_frame(&mut self) -> Frame {
        SettingsFrame::new(self.take_changes()).into_frame()
    }

    /// Values that differ from `snapshot`
    pub fn diff_since(&self, snapshot: &SettingsRegistry) -> Vec<(SettingsParameter, u32)> {
        SettingsParameter::ALL
            .iter()
            .filter(|p| self.get(**p) != snapshot.get(**p))
            .map(|p| (*p, self.get(*p)))
            .collect()
    }

    /// Copy of the values with no changes pending
    pub fn snapshot(&self) -> SettingsRegistry {
        SettingsRegistry {
            values: self.values,
            changed: [false; 7],
        }
    }

    /// Iterate over every (parameter, value) pair
    pub fn iter(&self) -> impl Iterator<Item = (SettingsParameter, u32)> + '_ {
        SettingsParameter::ALL.iter().map(move |p| (*p, self.get(*p)))
    }

    /// Get header table size
    pub fn header_table_size(&self) -> u32 {
        self.get(SettingsParameter::HeaderTableSize)
    }

    /// Get enable push
    pub fn enable_push(&self) -> bool {
        self.get(SettingsParameter::EnablePush) != 0
    }

    /// Get max concurrent streams (`u32::MAX` = unlimited)
    pub fn max_concurrent_streams(&self) -> u32 {
        self.get(SettingsParameter::MaxConcurrentStreams)
    }

    /// Get initial window size
    pub fn initial_window_size(&self) -> u32 {
        self.get(SettingsParameter::InitialWindowSize)
    }

    /// Get max frame size
    pub fn max_frame_size(&self) -> u32 {
        self.get(SettingsParameter::MaxFrameSize)
    }

    /// Get max header list size (`u32::MAX` = unlimited)
    pub fn max_header_list_size(&self) -> u32 {
        self.get(SettingsParameter::MaxHeaderListSize)
    }

    /// Get enable CONNECT protocol
    pub fn enable_connect_protocol(&self) -> bool {
        self.get(SettingsParameter::EnableConnectProtocol) != 0
    }
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SettingsRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for SettingsRegistry {}

/// Builder for the settings we propose to the peer
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    values: Vec<(SettingsParameter, u32)>,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        SettingsBuilder { values: Vec::new() }
    }

    fn with(mut self, param: SettingsParameter, value: u32) -> Self {
        self.values.retain(|(p, _)| *p != param);
        self.values.push((param, value));
        self
    }

    /// Set header table size
    pub fn header_table_size(self, size: u32) -> Self {
        self.with(SettingsParameter::HeaderTableSize, size)
    }

    /// Set enable push
    pub fn enable_push(self, enable: bool) -> Self {
        self.with(SettingsParameter::EnablePush, enable as u32)
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(self, max: u32) -> Self {
        self.with(SettingsParameter::MaxConcurrentStreams, max)
    }

    /// Set initial window size
    pub fn initial_window_size(self, size: u32) -> Self {
        self.with(SettingsParameter::InitialWindowSize, size)
    }

    /// Set max frame size
    pub fn max_frame_size(self, size: u32) -> Self {
        self.with(SettingsParameter::MaxFrameSize, size)
    }

    /// Set max header list size
    pub fn max_header_list_size(self, size: u32) -> Self {
        self.with(SettingsParameter::MaxHeaderListSize, size)
    }

    /// Set enable CONNECT protocol
    pub fn enable_connect_protocol(self, enable: bool) -> Self {
        self.with(SettingsParameter::EnableConnectProtocol, enable as u32)
    }

    /// Validate and build a registry whose non-default values are marked
    /// changed, ready for the initial SETTINGS frame.
    pub fn build(self) -> Result<SettingsRegistry> {
        let mut registry = SettingsRegistry::new();
        for (param, value) in self.values {
            param.validate(value)?;
            registry.set(param, value);
        }
        Ok(registry)
    }
}

/// What a received SETTINGS frame did
#[derive(Debug)]
pub enum SettingsOutcome {
    /// The peer acknowledged our proposal; our honored values changed
    Acked(Vec<SettingChange>),
    /// The peer announced its values; `ack` must be queued in response
    Remote {
        /// Changes applied to the peer registry
        changes: Vec<SettingChange>,
        /// SETTINGS frame with the ACK flag
        ack: Frame,
    },
}

/// A SETTINGS frame we sent and the peer has not acknowledged
#[derive(Debug)]
struct InFlight {
    sent_at: Instant,
    values: Vec<(SettingsParameter, u32)>,
    /// The ACK timeout was already reported
    overdue: bool,
}

/// The three settings registries of one connection plus ACK tracking
#[derive(Debug)]
pub struct SettingsManager {
    /// Values we honor (defaults, then whatever the peer ACKed)
    my: SettingsRegistry,
    /// Values we want, pending ACK
    initiated: SettingsRegistry,
    /// The peer's last announced values
    remote: SettingsRegistry,
    /// Unacknowledged SETTINGS frames, oldest first; ACKs arrive in order
    in_flight: VecDeque<InFlight>,
    ack_timeout: Duration,
}

impl SettingsManager {
    /// Create a manager proposing `initiated` to the peer
    pub fn new(initiated: SettingsRegistry, ack_timeout: Duration) -> Self {
        SettingsManager {
            my: SettingsRegistry::new(),
            initiated,
            remote: SettingsRegistry::new(),
            in_flight: VecDeque::new(),
            ack_timeout,
        }
    }

    /// Values we currently honor
    pub fn my(&self) -> &SettingsRegistry {
        &self.my
    }

    /// Values we proposed
    pub fn initiated(&self) -> &SettingsRegistry {
        &self.initiated
    }

    /// The peer's values
    pub fn remote(&self) -> &SettingsRegistry {
        &self.remote
    }

    /// Propose a new value; it is sent with the next `pending_frame`
    pub fn propose(&mut self, param: SettingsParameter, value: u32) -> Result<bool> {
        param.validate(value)?;
        Ok(self.initiated.set(param, value))
    }

    /// SETTINGS frame carrying proposals not yet sent, if any. `force`
    /// emits a frame even when nothing changed (the connection preface
    /// always carries one).
    pub fn pending_frame(&mut self, now: Instant, force: bool) -> Option<Frame> {
        if !force && !self.initiated.is_changed() {
            return None;
        }
        let values = self.initiated.take_changes();
        let frame = SettingsFrame::new(values.clone()).into_frame();
        self.in_flight.push_back(InFlight {
            sent_at: now,
            values,
            overdue: false,
        });
        Some(frame)
    }

    /// Apply a received SETTINGS frame
    pub fn on_frame(&mut self, frame: &SettingsFrame) -> Result<SettingsOutcome> {
        if frame.ack {
            // An ACK covers exactly the oldest frame still in flight
            let changes = match self.in_flight.pop_front() {
                Some(acked) => self.my.merge(&acked.values),
                None => Vec::new(),
            };
            return Ok(SettingsOutcome::Acked(changes));
        }

        for (param, value) in &frame.settings {
            param.validate(*value)?;
        }
        let changes = self.remote.merge(&frame.settings);
        Ok(SettingsOutcome::Remote {
            changes,
            ack: SettingsFrame::ack().into_frame(),
        })
    }

    /// Deadline of the oldest ACK not yet reported overdue
    pub fn ack_deadline(&self) -> Option<Instant> {
        self.in_flight
            .iter()
            .find(|frame| !frame.overdue)
            .map(|frame| frame.sent_at + self.ack_timeout)
    }

    /// Returns true once per frame whose ACK is overdue. The frame stays
    /// in flight, so a late ACK still applies its values.
    pub fn check_ack_timeout(&mut self, now: Instant) -> bool {
        let ack_timeout = self.ack_timeout;
        match self.in_flight.iter_mut().find(|frame| !frame.overdue) {
            Some(frame) if now >= frame.sent_at + ack_timeout => {
                frame.overdue = true;
                true
            }
            _ => false,
        }
    }

    /// Whether an ACK is awaited and not yet reported overdue
    pub fn awaiting_ack(&self) -> bool {
        self.ack_deadline().is_some()
    }
}
