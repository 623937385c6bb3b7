//! Centralised ICS editor API: surgical, line-level edits to an
//! existing calendar-object resource's raw text, so
//! components the object model does not represent (VTIMEZONE, VALARM,
//! unrecognised properties) round-trip verbatim instead of being
//! dropped by a parse→model→reserialize cycle.

use super::model::exdate_raw_key;
use super::text::{fold_line, split_lines, unfold};

/// An editable in-memory view over one calendar-object resource's
/// unfolded content lines.
#[derive(Debug, Clone)]
pub struct IcsDocument {
    lines: Vec<String>,
}

/// A `[start, end)` half-open range of line indices spanning one
/// `BEGIN:<comp>`..`END:<comp>` block, inclusive of both markers.
#[derive(Debug, Clone, Copy)]
struct Block {
    start: usize,
    end: usize,
}

impl IcsDocument {
    pub fn parse(raw: &str) -> Self {
        let unfolded = unfold(raw);
        Self {
            lines: split_lines(&unfolded),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&fold_line(line));
            out.push_str("\r\n");
        }
        out
    }

    /// Byte ranges (as line-index spans) of every top-level VEVENT
    /// block directly under VCALENDAR.
    fn vevent_blocks(&self) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut depth = 0i32;
        let mut vevent_depth_start: Option<(usize, i32)> = None;
        for (i, line) in self.lines.iter().enumerate() {
            let upper = line.to_ascii_uppercase();
            if let Some(rest) = upper.strip_prefix("BEGIN:") {
                depth += 1;
                if rest.trim() == "VEVENT" && vevent_depth_start.is_none() {
                    vevent_depth_start = Some((i, depth));
                }
            } else if let Some(rest) = upper.strip_prefix("END:") {
                if rest.trim() == "VEVENT"
                    && let Some((start, open_depth)) = vevent_depth_start
                    && open_depth == depth
                {
                    blocks.push(Block { start, end: i + 1 });
                    vevent_depth_start = None;
                }
                depth -= 1;
            }
        }
        blocks
    }

    fn block_property(&self, block: Block, name: &str) -> Option<String> {
        let prefix = format!("{name}:");
        let prefix_with_params = format!("{name};");
        for line in &self.lines[block.start..block.end] {
            let upper = line.to_ascii_uppercase();
            if upper.starts_with(&prefix) || upper.starts_with(&prefix_with_params) {
                return line.splitn(2, ':').nth(1).map(|s| s.to_string());
            }
        }
        None
    }

    fn block_has_recurrence_id_key(&self, block: Block, key: &str) -> bool {
        self.block_property(block, "RECURRENCE-ID")
            .map(|v| exdate_raw_key(&v) == key)
            .unwrap_or(false)
    }

    fn master_block(&self) -> Option<Block> {
        self.vevent_blocks()
            .into_iter()
            .find(|b| self.block_property(*b, "RECURRENCE-ID").is_none())
    }

    /// Replace the master VEVENT's EXDATE line(s) with a freshly built
    /// set. `values` are raw EXDATE content values (already in ICS
    /// compact form); `all_day` controls the `VALUE=DATE` parameter.
    pub fn with_exdates(mut self, values: &[String], all_day: bool) -> Self {
        let Some(block) = self.master_block() else {
            return self;
        };
        let mut kept: Vec<String> = Vec::new();
        for (i, line) in self.lines[block.start..block.end].iter().enumerate() {
            let upper = line.to_ascii_uppercase();
            if upper.starts_with("EXDATE:") || upper.starts_with("EXDATE;") {
                continue;
            }
            kept.push((block.start + i, line.clone()));
            let _ = i;
        }
        // Rebuild the block body without any EXDATE lines, then append
        // the new one (or none) right before END:VEVENT.
        let mut new_body: Vec<String> = Vec::new();
        for line in &self.lines[block.start..block.end - 1] {
            let upper = line.to_ascii_uppercase();
            if upper.starts_with("EXDATE:") || upper.starts_with("EXDATE;") {
                continue;
            }
            new_body.push(line.clone());
        }
        if !values.is_empty() {
            let param = if all_day { ";VALUE=DATE" } else { "" };
            new_body.push(format!("EXDATE{param}:{}", values.join(",")));
        }
        new_body.push(self.lines[block.end - 1].clone());

        let _ = kept;
        self.lines.splice(block.start..block.end, new_body);
        self
    }

    /// Replace the master VEVENT's RRULE line, or remove it when
    /// `rrule` is `None`.
    pub fn with_rrule(mut self, rrule: Option<&str>) -> Self {
        let Some(block) = self.master_block() else {
            return self;
        };
        let mut new_body: Vec<String> = Vec::new();
        let mut inserted = false;
        for (i, line) in self.lines[block.start..block.end].iter().enumerate() {
            let upper = line.to_ascii_uppercase();
            let is_last = block.start + i == block.end - 1;
            if upper.starts_with("RRULE:") {
                if let Some(r) = rrule {
                    new_body.push(format!("RRULE:{r}"));
                    inserted = true;
                }
                continue;
            }
            if is_last && !inserted && rrule.is_some() {
                new_body.push(format!("RRULE:{}", rrule.unwrap()));
                inserted = true;
            }
            new_body.push(line.clone());
        }
        self.lines.splice(block.start..block.end, new_body);
        self
    }

    /// Remove any existing override VEVENT whose RECURRENCE-ID matches
    /// `recurrence_id_key` (an [`exdate_raw_key`]-normalised value).
    pub fn strip_override_for(mut self, recurrence_id_key: &str) -> Self {
        if let Some(block) = self
            .vevent_blocks()
            .into_iter()
            .find(|b| self.block_has_recurrence_id_key(*b, recurrence_id_key))
        {
            self.lines.drain(block.start..block.end);
        }
        self
    }

    /// Insert a fully-formed override VEVENT block (as produced by
    /// [`crate::ics::serializer::serialize_vevent_block`]) right before
    /// `END:VCALENDAR`.
    pub fn inject_override(mut self, vevent_block_text: &str) -> Self {
        let Some(end_idx) = self
            .lines
            .iter()
            .rposition(|l| l.eq_ignore_ascii_case("END:VCALENDAR"))
        else {
            return self;
        };
        let unfolded = unfold(vevent_block_text);
        let new_lines = split_lines(&unfolded);
        self.lines.splice(end_idx..end_idx, new_lines);
        self
    }

    /// Every top-level VEVENT's RECURRENCE-ID key currently present
    /// (used to decide which expansion slots are covered by overrides).
    pub fn override_keys(&self) -> Vec<String> {
        self.vevent_blocks()
            .into_iter()
            .filter_map(|b| self.block_property(b, "RECURRENCE-ID"))
            .map(|v| exdate_raw_key(&v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_WITH_RRULE: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART;TZID=Europe/Berlin:20260105T090000\r\nRRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=3\r\nSUMMARY:Standup\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn with_exdates_appends_before_end_vevent() {
        let doc = IcsDocument::parse(MASTER_WITH_RRULE)
            .with_exdates(&["20260112T080000Z".to_string()], false);
        let text = doc.to_text();
        assert!(text.contains("EXDATE:20260112T080000Z"));
        assert!(text.find("EXDATE").unwrap() < text.find("END:VEVENT").unwrap());
    }

    #[test]
    fn with_rrule_replaces_existing_value() {
        let doc = IcsDocument::parse(MASTER_WITH_RRULE)
            .with_rrule(Some("FREQ=WEEKLY;BYDAY=MO;UNTIL=20260111"));
        let text = doc.to_text();
        assert!(text.contains("RRULE:FREQ=WEEKLY;BYDAY=MO;UNTIL=20260111"));
        assert_eq!(text.matches("RRULE:").count(), 1);
    }

    #[test]
    fn inject_then_strip_override_round_trips() {
        let override_block = "BEGIN:VEVENT\r\nUID:u1\r\nRECURRENCE-ID:20260112T080000Z\r\nDTSTART:20260112T080000Z\r\nSUMMARY:Moved\r\nEND:VEVENT\r\n";
        let doc = IcsDocument::parse(MASTER_WITH_RRULE).inject_override(override_block);
        assert_eq!(doc.override_keys(), vec!["20260112T080000Z".to_string()]);

        let stripped = doc.strip_override_for("20260112T080000Z");
        assert!(stripped.override_keys().is_empty());
    }
}
