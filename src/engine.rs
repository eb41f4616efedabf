//! Remap engine
//!
//! [`transform`] is the whole rewrite rule and does no I/O. [`run`] is the
//! blocking receive/transform/send loop executed on the processing thread.

use tracing::{debug, trace};

use crate::error::Result;
use crate::lifecycle::{EngineState, SharedState};
use crate::mapping::MappingTable;
use crate::midi::{format_hex, Channel, MidiMessage};
use crate::session::{CancelToken, PortSession, Received};

/// Rewrite one message.
///
/// Channel messages are moved to `channel`; Control Change controller numbers
/// found in `table` are replaced. Values and all other data bytes are kept.
/// Messages without a channel pass through untouched.
pub fn transform(msg: &MidiMessage, channel: Channel, table: &MappingTable) -> MidiMessage {
    if !msg.is_channel_message() {
        return msg.clone();
    }

    let rechanneled = msg.with_channel(channel);
    match rechanneled {
        MidiMessage::ControlChange { cc, .. } => match table.lookup(cc) {
            Some(replacement) => rechanneled.with_controller(replacement),
            None => rechanneled,
        },
        _ => rechanneled,
    }
}

/// Counters for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub forwarded: u64,
    pub remapped: u64,
}

/// Pump messages until the state leaves `Running` or `cancel` fires.
///
/// Device errors end the loop and are returned to the caller.
pub fn run(
    session: &mut PortSession,
    table: &MappingTable,
    state: &SharedState,
    cancel: &CancelToken,
) -> Result<RunStats> {
    let channel = session.channel();
    let mut stats = RunStats::default();

    debug!(
        "Engine loop started: {} -> {}",
        session.input_name(),
        session.output_name()
    );

    while state.get() == EngineState::Running {
        let msg = match session.receive(cancel)? {
            Received::Message(msg) => msg,
            Received::Cancelled => break,
        };

        let out = transform(&msg, channel, table);
        trace!(
            "{} => {}",
            format_hex(&msg.to_bytes()),
            format_hex(&out.to_bytes())
        );
        if out.data1() != msg.data1() {
            stats.remapped += 1;
        }

        session.send(&out)?;
        stats.forwarded += 1;
    }

    debug!(
        "Engine loop exited: {} forwarded, {} remapped",
        stats.forwarded, stats.remapped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;
    use crate::session::cancellation;
    use std::thread;
    use std::time::Duration;

    fn ch(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    fn table() -> MappingTable {
        MappingTable::from_pairs([(1, 74)]).unwrap()
    }

    fn apply(bytes: &[u8], channel: u8) -> Vec<u8> {
        transform(&MidiMessage::from_bytes(bytes), ch(channel), &table()).to_bytes()
    }

    #[test]
    fn test_mapped_cc_is_replaced() {
        assert_eq!(apply(&[0xB0, 1, 100], 0), vec![0xB0, 74, 100]);
    }

    #[test]
    fn test_unmapped_cc_passes_through() {
        assert_eq!(apply(&[0xB0, 5, 50], 0), vec![0xB0, 5, 50]);
    }

    #[test]
    fn test_note_on_gets_channel_only() {
        assert_eq!(apply(&[0x90, 60, 100], 3), vec![0x93, 60, 100]);
    }

    #[test]
    fn test_cc_on_other_channel_is_rechanneled_then_mapped() {
        assert_eq!(apply(&[0xB7, 1, 12], 2), vec![0xB2, 74, 12]);
    }

    #[test]
    fn test_note_number_matching_a_key_is_not_remapped() {
        // Only Control Change consults the table
        assert_eq!(apply(&[0x90, 1, 64], 0), vec![0x90, 1, 64]);
    }

    #[test]
    fn test_every_channel_voice_kind_keeps_data() {
        let cases: [&[u8]; 5] = [
            &[0x85, 10, 20],
            &[0xA5, 10, 20],
            &[0xC5, 10],
            &[0xD5, 10],
            &[0xE5, 10, 20],
        ];
        for bytes in cases {
            let out = apply(bytes, 9);
            assert_eq!(out[0], (bytes[0] & 0xF0) | 9);
            assert_eq!(&out[1..], &bytes[1..]);
        }
    }

    #[test]
    fn test_system_messages_untouched() {
        for bytes in [vec![0xF8], vec![0xF0, 0x43, 0x10, 0xF7], vec![0xF2, 0x10, 0x20]] {
            assert_eq!(apply(&bytes, 7), bytes);
        }
    }

    #[test]
    fn test_oversized_cc_is_forwarded_unchanged() {
        assert_eq!(apply(&[0xB0, 1, 100, 0x05], 4), vec![0xB0, 1, 100, 0x05]);
    }

    #[test]
    fn test_run_forwards_in_order_and_stops_on_cancel() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("in");
        let output = backend.add_output("out");
        let mut session = PortSession::open(&backend, "in", "out", ch(0)).unwrap();
        let state = SharedState::new(EngineState::Running);
        let (cancel, token) = cancellation();

        let worker = {
            let state = state.clone();
            thread::spawn(move || {
                let stats = run(&mut session, &table(), &state, &token);
                (stats, session)
            })
        };

        input.inject(&[0xB0, 1, 1]);
        input.inject(&[0xB0, 2, 2]);
        input.inject(&[0x90, 60, 3]);
        assert!(output.wait_for(3, Duration::from_secs(2)));

        cancel.cancel();
        let (stats, _session) = worker.join().unwrap();
        let stats = stats.unwrap();

        assert_eq!(stats.forwarded, 3);
        assert_eq!(stats.remapped, 1);
        assert_eq!(
            output.sent(),
            vec![vec![0xB0, 74, 1], vec![0xB0, 2, 2], vec![0x90, 60, 3]]
        );
    }

    #[test]
    fn test_run_returns_device_error_when_output_unplugged() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("in");
        let output = backend.add_output("out");
        let mut session = PortSession::open(&backend, "in", "out", ch(0)).unwrap();
        let state = SharedState::new(EngineState::Running);
        let (_cancel, token) = cancellation();

        output.unplug();
        input.inject(&[0xB0, 1, 1]);

        let result = run(&mut session, &table(), &state, &token);
        assert!(matches!(result, Err(crate::error::Error::Device(_))));
    }

    #[test]
    fn test_run_does_nothing_unless_running() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("in");
        let output = backend.add_output("out");
        let mut session = PortSession::open(&backend, "in", "out", ch(0)).unwrap();
        let state = SharedState::new(EngineState::Paused);
        let (_cancel, token) = cancellation();

        input.inject(&[0xB0, 1, 1]);
        let stats = run(&mut session, &table(), &state, &token).unwrap();

        assert_eq!(stats, RunStats::default());
        assert!(output.sent().is_empty());
    }
}
