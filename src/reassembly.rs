use crate::message::Message;
use crate::packet_header::PacketHeader;
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

struct InFlightMessage {
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
    /// admission order, used for oldest-first eviction
    admitted: u64,
}

impl InFlightMessage {
    fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    fn concatenate(self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(
            self.slots.iter().flatten().map(Vec::len).sum(),
        );
        for slot in self.slots.into_iter().flatten() {
            payload.extend_from_slice(&slot);
        }
        payload
    }
}

/// Accumulates fragments of multi-part messages until one of them is
///  complete. Single-part messages bypass the table entirely.
///
/// Entries whose remaining fragments never arrive would otherwise live
///  forever, so the table is capped: admitting a new sequence id beyond
///  `max_pending` evicts the oldest-admitted incomplete entry.
pub struct ReassemblyTable {
    pending: FxHashMap<u32, InFlightMessage>,
    max_pending: usize,
    max_parts: usize,
    admission_counter: u64,
}

impl ReassemblyTable {
    pub fn new(max_pending: usize, max_parts: usize) -> ReassemblyTable {
        assert!(max_pending > 0 && max_parts > 0);
        ReassemblyTable {
            pending: FxHashMap::default(),
            max_pending,
            max_parts,
            admission_counter: 0,
        }
    }

    /// Records one fragment. Returns the whole message the moment its last
    ///  fragment arrives, `None` while parts are still missing.
    ///
    /// Duplicate fragments silently overwrite their slot; completion is
    ///  decided purely by "no slot is empty", so a duplicate can never
    ///  complete a message twice. Fragments disagreeing with the entry's
    ///  part count are dropped.
    pub fn accept(&mut self, header: &PacketHeader, payload: &[u8]) -> Option<Message> {
        if header.parts_total == 1 {
            return Some(Self::completed(header, payload.to_vec()));
        }
        if header.part_index >= header.parts_total {
            warn!(
                "dropping fragment with part index {} out of range for {} parts",
                header.part_index, header.parts_total
            );
            return None;
        }
        if header.parts_total as usize > self.max_parts {
            // refuse to allocate slot arrays for absurd part counts
            warn!(
                "dropping fragment of message {} declaring {} parts (limit {})",
                header.sequence_id, header.parts_total, self.max_parts
            );
            return None;
        }

        let part_index = header.part_index as usize;

        if !self.pending.contains_key(&header.sequence_id) {
            self.evict_if_full();
            self.admission_counter += 1;
        }
        let admitted = self.admission_counter;
        let entry = self.pending.entry(header.sequence_id).or_insert_with(|| InFlightMessage {
            slots: vec![None; header.parts_total as usize],
            filled: 0,
            admitted,
        });

        if entry.slots.len() != header.parts_total as usize {
            warn!(
                "dropping fragment of message {} declaring {} parts where {} were expected",
                header.sequence_id,
                header.parts_total,
                entry.slots.len()
            );
            return None;
        }

        if entry.slots[part_index].is_none() {
            entry.filled += 1;
        }
        entry.slots[part_index] = Some(payload.to_vec());

        if entry.is_complete() {
            let entry = self
                .pending
                .remove(&header.sequence_id)
                .expect("entry was just looked up");
            trace!(
                "message {} complete after {} fragments",
                header.sequence_id,
                header.parts_total
            );
            Some(Self::completed(header, entry.concatenate()))
        } else {
            None
        }
    }

    /// Number of incomplete messages currently buffered.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn evict_if_full(&mut self) {
        if self.pending.len() < self.max_pending {
            return;
        }
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, entry)| entry.admitted)
            .map(|(&sequence_id, _)| sequence_id);
        if let Some(sequence_id) = oldest {
            if let Some(entry) = self.pending.remove(&sequence_id) {
                warn!(
                    "evicting incomplete message {} ({}/{} fragments) to admit a new one",
                    sequence_id,
                    entry.filled,
                    entry.slots.len()
                );
            }
        }
    }

    fn completed(header: &PacketHeader, payload: Vec<u8>) -> Message {
        Message {
            family: header.family,
            message_type: header.message_type,
            sequence_id: header.sequence_id,
            timestamp_millis: header.timestamp_millis,
            payload,
        }
    }
}
