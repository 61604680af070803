//! Flat record encoding of call records
//!
//! A call is stored as one history record with the fields in
//! [`STRUCTURE_NAMES`]. The participant fields are `,`-separated lists where
//! entry `i` of every list describes the `i`-th peer. Display names are
//! always quoted with inner quotes backslash-escaped; other entries are
//! quoted only when they are empty, carry surrounding whitespace, or contain
//! the delimiter or a quote. An empty field therefore means no entries.
//!
//! Times are written as epoch milliseconds. Reads also accept RFC 3339 and
//! the legacy `yyyy-MM-dd HH:mm:ss.SSS` text form (taken as UTC).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info};

use rvoip_history_store::{HistoryRecord, HistoryRecordStructure, HistoryRecordUpdater};

use crate::error::{CallHistoryError, CallHistoryResult};
use crate::records::{CallDirection, CallPeerRecord, CallPeerState, CallRecord, UNKNOWN_END_REASON};

pub const CALL_START: &str = "callStart";
pub const CALL_END: &str = "callEnd";
pub const DIRECTION: &str = "dir";
pub const PARTICIPANT_IDS: &str = "callParticipantIDs";
pub const PARTICIPANT_START: &str = "callParticipantStart";
pub const PARTICIPANT_END: &str = "callParticipantEnd";
pub const PARTICIPANT_STATES: &str = "callParticipantStates";
pub const END_REASON: &str = "callEndReason";
pub const PARTICIPANT_NAMES: &str = "callParticipantNames";
pub const SECONDARY_PARTICIPANT_IDS: &str = "secondaryCallParticipantIDs";
pub const ACCOUNT_UID: &str = "accountUID";

/// Persisted field names, in write order
pub const STRUCTURE_NAMES: [&str; 11] = [
    CALL_START,
    CALL_END,
    DIRECTION,
    PARTICIPANT_IDS,
    PARTICIPANT_START,
    PARTICIPANT_END,
    PARTICIPANT_STATES,
    END_REASON,
    PARTICIPANT_NAMES,
    SECONDARY_PARTICIPANT_IDS,
    ACCOUNT_UID,
];

/// List delimiter inside participant fields
pub const DELIM: char = ',';

const LEGACY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn record_structure() -> HistoryRecordStructure {
    HistoryRecordStructure::new(STRUCTURE_NAMES)
}

/// Encode a finished call as values in [`STRUCTURE_NAMES`] order
pub fn encode_call_record(record: &CallRecord) -> CallHistoryResult<Vec<String>> {
    let end = record
        .end_time()
        .ok_or_else(|| CallHistoryError::invalid_record("call has not ended"))?;

    let peers = record.peer_records();
    let ids = join_csv(peers.iter().map(|p| p.peer_address()));
    let starts = join_csv(peers.iter().map(|p| encode_time(p.start_time())));
    let ends = join_csv(peers.iter().map(|p| encode_time(p.end_time().unwrap_or(end))));
    let states = join_csv(
        peers
            .iter()
            .map(|p| p.state().unwrap_or(CallPeerState::Unknown).as_state_str()),
    );
    let names = peers
        .iter()
        .map(|p| p.display_name().map(quote).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(&DELIM.to_string());
    let secondary = join_csv(peers.iter().map(|p| p.secondary_address().unwrap_or_default()));

    Ok(vec![
        encode_time(record.start_time()),
        encode_time(end),
        record.direction().as_str().to_string(),
        ids,
        starts,
        ends,
        states,
        record.end_reason().to_string(),
        names,
        secondary,
        record.account_id().unwrap_or_default().to_string(),
    ])
}

/// Rebuild a call record from a stored history record
///
/// Fails only when the call start time is missing or unreadable. Peer lists
/// shorter than the id list fall back to the call's own times (start, end)
/// or leave the state unset; every such anomaly is logged.
pub fn decode_call_record(record: &HistoryRecord) -> CallHistoryResult<CallRecord> {
    let start = record
        .value(CALL_START)
        .and_then(parse_time)
        .ok_or_else(|| CallHistoryError::invalid_record("missing or unreadable callStart"))?;
    let end = record.value(CALL_END).and_then(parse_time);
    if end.is_none() {
        info!(timestamp = %record.timestamp, "Call history record without a readable callEnd");
    }

    let direction = record
        .value(DIRECTION)
        .map(CallDirection::from_persisted)
        .unwrap_or(CallDirection::Out);

    let mut call = CallRecord::new(direction, start);
    if let Some(end) = end {
        call.set_end_time(end);
    }
    call.set_end_reason(
        record
            .value(END_REASON)
            .and_then(|r| r.trim().parse().ok())
            .unwrap_or(UNKNOWN_END_REASON),
    );
    call.set_account_id(record.value(ACCOUNT_UID).filter(|a| !a.is_empty()).map(str::to_string));

    let ids = record.value(PARTICIPANT_IDS).map(split_csv).unwrap_or_default();
    let starts = record.value(PARTICIPANT_START).map(split_csv).unwrap_or_default();
    let ends = record.value(PARTICIPANT_END).map(split_csv).unwrap_or_default();
    let states = record.value(PARTICIPANT_STATES).map(split_csv);
    let names = record.value(PARTICIPANT_NAMES).map(split_csv).unwrap_or_default();
    let secondary = record
        .value(SECONDARY_PARTICIPANT_IDS)
        .map(split_csv)
        .unwrap_or_default();

    let count = ids.len();
    if starts.len() != count || ends.len() != count {
        info!(
            ids = count,
            starts = starts.len(),
            ends = ends.len(),
            timestamp = %record.timestamp,
            "Call history peer time lists differ from ids list"
        );
    }
    match &states {
        Some(states) if states.len() != count => info!(
            ids = count,
            states = states.len(),
            timestamp = %record.timestamp,
            "Call history state list differs from ids list"
        ),
        None if count > 0 => debug!(timestamp = %record.timestamp, "Call history record without peer states"),
        _ => {}
    }

    for (i, address) in ids.into_iter().enumerate() {
        let peer_start = starts.get(i).and_then(|s| parse_time(s)).unwrap_or(start);
        let peer_end = ends.get(i).and_then(|s| parse_time(s)).or(end);

        let mut peer = CallPeerRecord::new(address, peer_start);
        peer.set_end_time(peer_end);
        peer.set_state(
            states
                .as_ref()
                .and_then(|s| s.get(i))
                .map(|s| CallPeerState::from_state_str(s.trim())),
        );
        peer.set_display_name(names.get(i).filter(|n| !n.is_empty()).cloned());
        peer.set_secondary_address(secondary.get(i).filter(|s| !s.is_empty()).cloned());
        call.peer_records_mut().push(peer);
    }

    Ok(call)
}

pub fn encode_time(time: DateTime<Utc>) -> String {
    time.timestamp_millis().to_string()
}

/// Parse epoch milliseconds, RFC 3339 or the legacy date form
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, LEGACY_DATE_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn join_csv<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| encode_list_entry(item.as_ref()))
        .collect::<Vec<_>>()
        .join(&DELIM.to_string())
}

/// One participant list entry as it appears in the stored field
pub fn encode_list_entry(item: &str) -> String {
    if item.is_empty() || item.trim() != item || item.contains(DELIM) || item.contains('"') {
        quote(item)
    } else {
        item.to_string()
    }
}

/// Split a participant list, honouring quotes and backslash escapes
///
/// Entries are kept verbatim and empty positions are kept so that lists stay
/// aligned; an empty input yields no entries.
pub fn split_csv(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => in_quotes = !in_quotes,
            c if c == DELIM && !in_quotes => {
                items.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    items.push(current);
    items
}

/// Fills in the secondary address of one peer in a stored call
///
/// Matches the first record listing `peer_address` whose entry for that peer
/// started at `start` and has no secondary address yet. Records written
/// before secondary addresses were stored have no field to update.
#[derive(Debug, Clone)]
pub struct SecondaryAddressUpdater {
    pub start: DateTime<Utc>,
    pub peer_address: String,
    pub secondary: String,
}

impl SecondaryAddressUpdater {
    fn peer_index(&self, record: &HistoryRecord) -> Option<usize> {
        let ids = split_csv(record.value(PARTICIPANT_IDS)?);
        let starts = split_csv(record.value(PARTICIPANT_START)?);
        ids.iter().enumerate().position(|(i, id)| {
            *id == self.peer_address && starts.get(i).and_then(|s| parse_time(s)) == Some(self.start)
        })
    }
}

impl HistoryRecordUpdater for SecondaryAddressUpdater {
    fn is_matching(&self, record: &HistoryRecord) -> bool {
        let Some(index) = self.peer_index(record) else {
            return false;
        };
        let secondary = record
            .value(SECONDARY_PARTICIPANT_IDS)
            .map(split_csv)
            .unwrap_or_default();
        secondary.get(index).map_or(true, |s| s.is_empty())
    }

    fn update_changes(&self, record: &HistoryRecord) -> HashMap<String, String> {
        let mut changes = HashMap::new();
        let Some(index) = self.peer_index(record) else {
            return changes;
        };
        let peer_count = record.value(PARTICIPANT_IDS).map(split_csv).unwrap_or_default().len();

        let mut secondary = record
            .value(SECONDARY_PARTICIPANT_IDS)
            .map(split_csv)
            .unwrap_or_default();
        secondary.resize(peer_count.max(index + 1), String::new());
        secondary[index] = self.secondary.clone();

        changes.insert(SECONDARY_PARTICIPANT_IDS.to_string(), join_csv(secondary));
        changes
    }

    /// Stored calls stay filed under their end time
    fn updated_timestamp(&self, record: &HistoryRecord) -> DateTime<Utc> {
        record.timestamp
    }
}
