//! Event encoding.
//!
//! Events share the 32-byte packet size with replies. The first byte is the
//! event code assigned to the extension (`event_base + n`), followed by a
//! kind byte and the sequence number of the last request processed on the
//! connection.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{PACKET_SIZE, int64::put_int64};

/// Offset of CounterNotify from the extension's event base.
pub const COUNTER_NOTIFY: u8 = 0;

/// Offset of AlarmNotify from the extension's event base.
pub const ALARM_NOTIFY: u8 = 1;

/// Sent when an `Await` condition is satisfied or its counter is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterNotify {
    /// Counter the condition referenced
    pub counter: u32,
    /// Test value the condition waited for
    pub wait_value: i64,
    /// Counter value when the event was generated
    pub counter_value: i64,
    /// Milliseconds since the last server reset
    pub timestamp: u32,
    /// Number of events still to follow for the same request
    pub count: u16,
    /// Whether the event was caused by destruction of the counter
    pub destroyed: bool,
}

/// Alarm state reported by AlarmNotify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlarmState {
    /// Alarm still armed
    Active = 0,
    /// Alarm disarmed
    Inactive = 1,
    /// Alarm destroyed
    Destroyed = 2,
}

/// Sent when an alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmNotify {
    /// Alarm id
    pub alarm: u32,
    /// Counter value when the alarm fired
    pub counter_value: i64,
    /// Alarm test value
    pub alarm_value: i64,
    /// Milliseconds since the last server reset
    pub timestamp: u32,
    /// Alarm state after firing
    pub state: AlarmState,
}

/// An event generated by the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Counter await resolved
    CounterNotify(CounterNotify),
    /// Alarm fired
    AlarmNotify(AlarmNotify),
}

impl Event {
    /// Encode the event using the extension's event base.
    pub fn encode(&self, event_base: u8, sequence: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);

        match self {
            Self::CounterNotify(notify) => {
                buf.put_u8(event_base.wrapping_add(COUNTER_NOTIFY));
                buf.put_u8(0);
                buf.put_u16(sequence);
                buf.put_u32(notify.counter);
                put_int64(&mut buf, notify.wait_value);
                put_int64(&mut buf, notify.counter_value);
                buf.put_u32(notify.timestamp);
                buf.put_u16(notify.count);
                buf.put_u8(u8::from(notify.destroyed));
                buf.put_u8(0);
            },
            Self::AlarmNotify(notify) => {
                buf.put_u8(event_base.wrapping_add(ALARM_NOTIFY));
                buf.put_u8(1);
                buf.put_u16(sequence);
                buf.put_u32(notify.alarm);
                put_int64(&mut buf, notify.counter_value);
                put_int64(&mut buf, notify.alarm_value);
                buf.put_u32(notify.timestamp);
                buf.put_u8(notify.state as u8);
                buf.put_bytes(0, 3);
            },
        }

        buf.freeze()
    }
}
