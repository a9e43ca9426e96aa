//! # Event and Work Ordering

use crate::domain::{EventRecord, EventWatermark, RedemptionRecord, RedemptionState};

/// Split `[from, to]` into consecutive ranges of at most `chunk` blocks.
pub fn read_ranges(from: u64, to: u64, chunk: u64) -> Vec<(u64, u64)> {
    let chunk = chunk.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(chunk - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Sort by `(block, log index)`, drop duplicates and anything the
/// watermark already covers.
pub fn order_new_events(mut records: Vec<EventRecord>, watermark: &EventWatermark) -> Vec<EventRecord> {
    records.sort_by_key(|r| r.position);
    records.dedup_by_key(|r| r.position);
    records.retain(|r| !watermark.covers(r.position));
    records
}

/// All Started redemptions by request id, then at most `cap` of the rest.
pub fn prioritise_redemptions(
    mut open: Vec<RedemptionRecord>,
    cap: usize,
) -> Vec<RedemptionRecord> {
    open.sort_by_key(|r| (r.state.handling_priority(), r.request_id));
    let started = open
        .iter()
        .take_while(|r| r.state == RedemptionState::Started)
        .count();
    open.truncate(started.saturating_add(cap));
    open
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventPosition, LedgerEvent, RedemptionRequest};

    fn redemption(request_id: u64, state: RedemptionState) -> RedemptionRecord {
        let mut record = RedemptionRecord::from_request(
            "0xvault",
            &RedemptionRequest {
                request_id,
                redeemer: "0xr".to_string(),
                payment_address: "rR".to_string(),
                value: 10,
                fee: 1,
                last_underlying_block: 10,
                last_underlying_timestamp: 10,
                payment_reference: [0u8; 32],
            },
        );
        record.state = state;
        record
    }

    #[test]
    fn test_read_ranges() {
        assert_eq!(read_ranges(10, 25, 10), vec![(10, 19), (20, 25)]);
        assert_eq!(read_ranges(10, 10, 10), vec![(10, 10)]);
        assert!(read_ranges(11, 10, 10).is_empty());
        assert_eq!(read_ranges(1, 3, 0), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_order_new_events() {
        let records = vec![
            EventRecord::new(11, 0, LedgerEvent::AgentDestroyed),
            EventRecord::new(10, 4, LedgerEvent::UnderlyingBalanceTooLow),
            EventRecord::new(10, 2, LedgerEvent::UnderlyingBalanceTooLow),
            EventRecord::new(10, 4, LedgerEvent::UnderlyingBalanceTooLow),
        ];
        let watermark = EventWatermark {
            next_block: 10,
            last_applied: Some(EventPosition::new(10, 2)),
        };
        let ordered = order_new_events(records, &watermark);
        let positions: Vec<_> = ordered.iter().map(|r| r.position).collect();
        assert_eq!(
            positions,
            vec![EventPosition::new(10, 4), EventPosition::new(11, 0)]
        );
    }

    #[test]
    fn test_started_first_and_cap() {
        let open = vec![
            redemption(5, RedemptionState::AwaitingProof),
            redemption(3, RedemptionState::Started),
            redemption(4, RedemptionState::Paid),
            redemption(1, RedemptionState::Started),
            redemption(2, RedemptionState::ProofNotRequested),
        ];
        let ids: Vec<_> = prioritise_redemptions(open, 2)
            .iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(ids, vec![1, 3, 4, 5]);
    }
}
