//! Policy table export.
//!
//! Enumerates every discretized state (player total 4..=21, usable ace,
//! true-count bin), evaluates the trained network in eval mode, and records
//! the greedy action in a dense `[22][2][bins]` table of action indices.
//! Entries for unreachable totals below 4 are zero-filled. The table is
//! emitted in three formats: a native binary layout with a small header, a
//! flat CSV for inspection, and a C header for firmware embedding.
//!
//! Export is a pure batch transformation: the same parameters always
//! produce byte-identical artifacts.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use candle_core::{Device, Tensor};

use blackjack_core::Hand;

use crate::encoder::{StateEncoder, STATE_DIM, TOTAL_MAX, TOTAL_MIN};
use crate::network::{DuelingNet, RunMode};
use crate::DqnError;

/// First dimension of the table: player totals 0..=21, with entries below
/// [`TOTAL_MIN`] zero-filled.
pub const TABLE_TOTALS: usize = 22;

/// Second dimension: usable-ace flag.
pub const TABLE_ACE: usize = 2;

/// Dealer upcard used for the (dealer-independent) table variant.
const EXPORT_DEALER_UPCARD: u8 = 6;

/// Magic bytes of the binary format.
const BINARY_MAGIC: &[u8; 4] = b"BJPT";

/// Binary format version.
const BINARY_VERSION: u8 = 1;

/// Dense greedy-action table indexed by
/// `[player_total][usable_ace][count_bin]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    entries: Vec<u8>,
    count_bins: usize,
}

impl PolicyTable {
    /// Build the table by greedy evaluation of `net` over every state.
    ///
    /// # Errors
    ///
    /// Returns a candle error if a forward pass fails.
    pub fn from_network(
        net: &DuelingNet,
        encoder: &StateEncoder,
        device: &Device,
    ) -> Result<Self, DqnError> {
        let count_bins = encoder.bins().len();
        let mut entries = vec![0u8; TABLE_TOTALS * TABLE_ACE * count_bins];

        // One batched forward over all reachable states, in table order.
        let mut features = Vec::new();
        let mut slots = Vec::new();
        for total in TOTAL_MIN..=TOTAL_MAX {
            for usable in 0..TABLE_ACE {
                let hand = representative_hand(total, usable == 1);
                for bin in 0..count_bins {
                    features.extend_from_slice(&encoder.encode(&hand, EXPORT_DEALER_UPCARD, bin));
                    slots.push(table_index(total as usize, usable, bin, count_bins));
                }
            }
        }

        let rows = slots.len();
        let input = Tensor::from_vec(features, (rows, STATE_DIM), device)?;
        let greedy = net
            .forward(&input, RunMode::Eval)?
            .argmax(1)?
            .to_vec1::<u32>()?;

        #[allow(clippy::cast_possible_truncation)]
        for (slot, action) in slots.into_iter().zip(greedy) {
            entries[slot] = action as u8;
        }

        Ok(Self {
            entries,
            count_bins,
        })
    }

    /// Action index at `[total][usable][bin]`.
    #[must_use]
    pub fn get(&self, total: usize, usable: usize, bin: usize) -> u8 {
        self.entries[table_index(total, usable, bin, self.count_bins)]
    }

    #[must_use]
    pub fn count_bins(&self) -> usize {
        self.count_bins
    }

    #[must_use]
    pub fn entries(&self) -> &[u8] {
        &self.entries
    }
}

fn table_index(total: usize, usable: usize, bin: usize, count_bins: usize) -> usize {
    (total * TABLE_ACE + usable) * count_bins + bin
}

/// Synthesize a hand matching a table slot's total and ace status.
///
/// Soft totals from 12 pair an ace with its complement. Hard totals use a
/// two-card hand except hard 21, which cannot exist in two cards without
/// being a natural and gets a three-card stand-in. Soft totals below 12 are
/// unreachable as stable states and inherit the hard synthesis.
fn representative_hand(total: u32, usable: bool) -> Hand {
    #[allow(clippy::cast_possible_truncation)]
    let t = total as u8;
    if usable && total >= 12 {
        return Hand::of(&[1, t - 11]);
    }
    match t {
        4..=11 => Hand::of(&[t - 2, 2]),
        12..=20 => Hand::of(&[10, t - 10]),
        _ => Hand::of(&[10, 9, 2]),
    }
}

// ---------------------------------------------------------------------------
// Binary format
// ---------------------------------------------------------------------------

impl PolicyTable {
    /// Write the native binary layout: magic, version, the three dimension
    /// sizes, then the entries in row-major order.
    ///
    /// # Errors
    ///
    /// Returns an io error if the file cannot be written.
    pub fn write_binary<P: AsRef<Path>>(&self, path: P) -> Result<(), DqnError> {
        let mut bytes = Vec::with_capacity(8 + self.entries.len());
        bytes.extend_from_slice(BINARY_MAGIC);
        bytes.push(BINARY_VERSION);
        #[allow(clippy::cast_possible_truncation)]
        {
            bytes.push(TABLE_TOTALS as u8);
            bytes.push(TABLE_ACE as u8);
            bytes.push(self.count_bins as u8);
        }
        bytes.extend_from_slice(&self.entries);
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Load a table previously written by [`write_binary`](Self::write_binary).
    ///
    /// # Errors
    ///
    /// Returns [`DqnError::MalformedTable`] on a bad magic, version, or
    /// length, and an io error if the file cannot be read.
    pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self, DqnError> {
        let bytes = fs::read(path)?;
        if bytes.len() < 8 || &bytes[0..4] != BINARY_MAGIC {
            return Err(DqnError::MalformedTable("bad magic".into()));
        }
        if bytes[4] != BINARY_VERSION {
            return Err(DqnError::MalformedTable(format!(
                "unsupported version {}",
                bytes[4]
            )));
        }
        let (totals, ace, count_bins) = (bytes[5] as usize, bytes[6] as usize, bytes[7] as usize);
        if totals != TABLE_TOTALS || ace != TABLE_ACE {
            return Err(DqnError::MalformedTable(format!(
                "unexpected dimensions [{totals}][{ace}][{count_bins}]"
            )));
        }
        let entries = bytes[8..].to_vec();
        if entries.len() != totals * ace * count_bins {
            return Err(DqnError::MalformedTable(format!(
                "expected {} entries, found {}",
                totals * ace * count_bins,
                entries.len()
            )));
        }
        Ok(Self {
            entries,
            count_bins,
        })
    }
}

// ---------------------------------------------------------------------------
// Text formats
// ---------------------------------------------------------------------------

impl PolicyTable {
    /// Write the table as CSV: one row per player total, the two ace
    /// planes' bins flattened across the columns.
    ///
    /// # Errors
    ///
    /// Returns an io error if the file cannot be written.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), DqnError> {
        let mut out = String::new();
        for total in 0..TABLE_TOTALS {
            let row_start = total * TABLE_ACE * self.count_bins;
            let row = &self.entries[row_start..row_start + TABLE_ACE * self.count_bins];
            let line: Vec<String> = row.iter().map(ToString::to_string).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }

    /// Write a C header with a statically-initialized array literal
    /// suitable for embedding in firmware.
    ///
    /// # Errors
    ///
    /// Returns an io error if the file cannot be written.
    pub fn write_c_header<P: AsRef<Path>>(&self, path: P) -> Result<(), DqnError> {
        let bins = self.count_bins;
        let mut out = String::new();
        out.push_str("// Blackjack policy table\n");
        out.push_str("// Actions: 0=HIT 1=STAND 2=DOUBLE 3=SPLIT 4=SURRENDER\n");
        let _ = writeln!(out, "// Dimensions: [{TABLE_TOTALS}][{TABLE_ACE}][{bins}]\n");
        out.push_str("#include <stdint.h>\n\n");
        let _ = writeln!(
            out,
            "const uint8_t blackjack_policy[{TABLE_TOTALS}][{TABLE_ACE}][{bins}] = {{"
        );
        for total in 0..TABLE_TOTALS {
            out.push_str("  {");
            for usable in 0..TABLE_ACE {
                let values: Vec<String> = (0..bins)
                    .map(|bin| self.get(total, usable, bin).to_string())
                    .collect();
                let _ = write!(out, "{{{}}}", values.join(","));
                if usable == 0 {
                    out.push(',');
                }
            }
            out.push_str("},\n");
        }
        out.push_str("};\n");
        fs::write(path, out)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
