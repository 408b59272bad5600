use anyhow::Result;
use rand::distr::{Alphanumeric, Distribution};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Zipf;

/// Longest text field, in bytes.
pub const MAX_TEXT_LEN: u64 = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: i64,
    pub amount: f64,
    pub created_at_micros: i64,
    pub name: String,
    pub tag: String,
}

impl Row {
    /// Fixed little-endian layout: id, amount, created_at, then two
    /// length-prefixed texts.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.clear();
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(&self.created_at_micros.to_le_bytes());
        for text in [&self.name, &self.tag] {
            buf.push(text.len() as u8);
            buf.extend_from_slice(text.as_bytes());
        }
    }

    #[cfg(test)]
    pub fn decode(bytes: &[u8]) -> Result<Row> {
        anyhow::ensure!(bytes.len() >= 24, "row too short: {} bytes", bytes.len());
        let word = |i: usize| -> [u8; 8] { bytes[i * 8..i * 8 + 8].try_into().unwrap() };
        let mut rest = &bytes[24..];
        let mut text = || -> Result<String> {
            anyhow::ensure!(!rest.is_empty(), "missing text length");
            let len = rest[0] as usize;
            anyhow::ensure!(rest.len() > len, "text truncated");
            let s = String::from_utf8(rest[1..=len].to_vec())?;
            rest = &rest[len + 1..];
            Ok(s)
        };
        let name = text()?;
        let tag = text()?;
        Ok(Row {
            id: i64::from_le_bytes(word(0)),
            amount: f64::from_le_bytes(word(1)),
            created_at_micros: i64::from_le_bytes(word(2)),
            name,
            tag,
        })
    }
}

/// Builds the payload for a key. The same key always yields the same row,
/// so a retried batch writes exactly what the failed attempt tried to.
#[derive(Debug, Clone)]
pub struct PayloadGen {
    text_len: Zipf<f64>,
    created_at_micros: i64,
}

impl PayloadGen {
    pub fn new(created_at_micros: i64) -> Result<Self> {
        let text_len = Zipf::new(MAX_TEXT_LEN as f64, 1.0)?;
        Ok(PayloadGen { text_len, created_at_micros })
    }

    pub fn row(&self, key: i64) -> Row {
        let mut rng = SmallRng::seed_from_u64(key as u64);
        let amount = (rng.random_range(0..1_000_000) as f64) / 100.0;
        let name = self.text(&mut rng);
        let tag = self.text(&mut rng);
        Row {
            id: key,
            amount,
            created_at_micros: self.created_at_micros,
            name,
            tag,
        }
    }

    fn text(&self, rng: &mut SmallRng) -> String {
        let len = self.text_len.sample(rng) as usize;
        Alphanumeric.sample_iter(rng).take(len).map(char::from).collect()
    }
}
