//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! Two kinds of window exist per direction. [`FlowControlWindow`] tracks the
//! credit the peer granted us for sending; it may go negative when the peer
//! lowers SETTINGS_INITIAL_WINDOW_SIZE and must never be clamped.
//! [`RecvWindow`] tracks the credit we granted the peer and decides when a
//! WINDOW_UPDATE is due.

use super::error::{Error, Result};
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Largest legal window (2^31 - 1)
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// Send-side flow control window
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Initial window size the current value was derived from
    initial_size: u32,
    /// Current window size (can be negative if over-committed)
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Bytes that may be sent right now (zero while the window is negative)
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    /// Check if window can send specified amount
    pub fn can_send(&self, amount: usize) -> bool {
        self.current_size >= amount as i64
    }

    /// Account for `amount` bytes of DATA sent. Callers size their frames
    /// with [`FlowControlWindow::available`] first.
    pub fn consume(&mut self, amount: usize) {
        self.current_size -= amount as i64;
    }

    /// Increase window size (WINDOW_UPDATE)
    ///
    /// Returns the new window size
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "Window update increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;

        // Check for overflow (RFC 7540 Section 6.9.1)
        if new_size > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Update initial window size from SETTINGS (RFC 7540 Section 6.9.2)
    ///
    /// The current size moves by the difference between the new and old
    /// initial sizes and may become negative.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;

        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive-side flow control window
///
/// Counts the credit still granted to the peer. Once it drops to the
/// threshold (a fraction of the target size) [`RecvWindow::take_update`]
/// yields the increment that tops it back up.
#[derive(Debug, Clone)]
pub struct RecvWindow {
    /// Size the window is topped back up to
    target: u32,
    /// Credit currently granted to the peer
    available: i64,
    /// Fraction of `target` at or below which an update is due
    threshold: f64,
}

impl RecvWindow {
    /// Create a receive window with the given target size
    pub fn new(target: u32, threshold: f64) -> Self {
        RecvWindow {
            target,
            available: target as i64,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Size the window is topped back up to
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Credit currently granted to the peer
    pub fn available(&self) -> i64 {
        self.available
    }

    /// Account for a received DATA frame (full payload length, padding included)
    pub fn consume(&mut self, amount: usize) -> Result<()> {
        let amount = amount as i64;
        if amount > self.available {
            return Err(Error::FlowControl(format!(
                "peer sent {} bytes with only {} bytes of window",
                amount, self.available
            )));
        }
        self.available -= amount;
        Ok(())
    }

    /// Change the target size. Returns the increment to announce with a
    /// WINDOW_UPDATE when the window grew.
    pub fn resize(&mut self, target: u32) -> Option<u32> {
        let delta = target as i64 - self.target as i64;
        self.target = target;
        self.available += delta;
        if delta > 0 {
            Some(delta as u32)
        } else {
            None
        }
    }

    /// Whether the window sits at or below the update threshold
    pub fn needs_update(&self) -> bool {
        self.available <= (self.target as f64 * self.threshold) as i64
            && self.available < self.target as i64
    }

    /// Increment for a WINDOW_UPDATE when one is due; the window is
    /// considered topped up afterwards.
    pub fn take_update(&mut self) -> Option<u32> {
        if !self.needs_update() {
            return None;
        }
        let increment = (self.target as i64 - self.available) as u32;
        self.available = self.target as i64;
        Some(increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_control_window_basic() {
        let window = FlowControlWindow::new();
        assert_eq!(window.size(), DEFAULT_INITIAL_WINDOW_SIZE as i64);
        assert_eq!(window.available(), DEFAULT_INITIAL_WINDOW_SIZE as usize);
    }

    #[test]
    fn test_flow_control_window_consume() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);
        assert_eq!(window.size(), 50);
        assert!(window.can_send(50));
        assert!(!window.can_send(51));

        window.consume(50);
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn test_flow_control_window_increase() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);
        assert_eq!(window.increase(100).unwrap(), 150);

        assert!(matches!(window.increase(0), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_flow_control_window_overflow() {
        let mut window = FlowControlWindow::with_initial_size(0x7FFFFFFF);
        assert!(matches!(window.increase(1), Err(Error::FlowControl(_))));
    }

    #[test]
    fn test_flow_control_window_update_initial_size() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);

        window.update_initial_size(200).unwrap();
        assert_eq!(window.initial_size(), 200);
        assert_eq!(window.size(), 150); // 50 + 100

        window.update_initial_size(150).unwrap();
        assert_eq!(window.size(), 100); // 150 - 50
    }

    #[test]
    fn test_window_goes_negative_without_clamping() {
        let mut window = FlowControlWindow::with_initial_size(65535);
        window.consume(60000);
        window.update_initial_size(1000).unwrap();
        assert_eq!(window.size(), 1000 - 60000);
        assert_eq!(window.available(), 0);

        // Credit must first pay off the deficit
        window.increase(59000).unwrap();
        assert_eq!(window.size(), 0);
        window.increase(10).unwrap();
        assert_eq!(window.available(), 10);
    }

    #[test]
    fn test_window_conservation() {
        let initial = 65535u32;
        let mut window = FlowControlWindow::with_initial_size(initial);
        let mut sent = 0i64;
        let mut granted = 0i64;
        let mut settings_delta = 0i64;

        for round in 0..20u32 {
            let chunk = window.available().min(16384 + round as usize);
            window.consume(chunk);
            sent += chunk as i64;

            let increment = 1000 * (round + 1);
            window.increase(increment).unwrap();
            granted += increment as i64;

            if round == 7 {
                let old = window.initial_size();
                window.update_initial_size(30000).unwrap();
                settings_delta += 30000 - old as i64;
            }

            assert_eq!(window.size(), initial as i64 - sent + granted + settings_delta);
        }
    }

    #[test]
    fn test_recv_window_threshold() {
        let mut window = RecvWindow::new(100, 0.5);
        assert_eq!(window.take_update(), None);

        window.consume(40).unwrap();
        assert_eq!(window.take_update(), None);

        window.consume(10).unwrap();
        assert_eq!(window.take_update(), Some(50));
        assert_eq!(window.available(), 100);
    }

    #[test]
    fn test_recv_window_overrun() {
        let mut window = RecvWindow::new(10, 0.5);
        assert!(matches!(window.consume(11), Err(Error::FlowControl(_))));
    }

    #[test]
    fn test_recv_window_resize() {
        let mut window = RecvWindow::new(65535, 0.5);
        assert_eq!(window.resize(10 * 1024 * 1024), Some(10 * 1024 * 1024 - 65535));
        assert_eq!(window.available(), 10 * 1024 * 1024);
        assert_eq!(window.resize(1024), None);
        assert_eq!(window.available(), 1024);
    }
}
