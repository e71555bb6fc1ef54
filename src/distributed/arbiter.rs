//! Winner arbitration
//!
//! Candidates are compared by the objective printed in their result row, the field
//! right after the third `|` (the leading pipe counts as the first):
//!
//! ```text
//! |* 1234/(2/4) |     3 |       50 |  ...
//! ^             ^       ^
//! 1             2       3 -> objective = 50
//! ```

use super::error::{ProtocolError, ProtocolResult};
use super::protocol::Rank;
use serde::{Deserialize, Serialize};

/// A worker's finished result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub origin: Rank,
    pub objective: f64,
    pub rendered: String,
}

impl ResultRecord {
    pub fn new(origin: Rank, objective: f64, rendered: impl Into<String>) -> Self {
        Self {
            origin,
            objective,
            rendered: rendered.into(),
        }
    }

    /// Rebuild a record from a result row, reading the objective out of the text
    pub fn from_wire(origin: Rank, rendered: &str) -> ProtocolResult<Self> {
        let objective = objective_field(rendered)
            .map_err(|reason| ProtocolError::MalformedResult { origin, reason })?;
        Ok(Self::new(origin, objective, rendered))
    }
}

/// Extract the objective from a rendered result row
pub fn objective_field(rendered: &str) -> Result<f64, String> {
    let mut fields = rendered.splitn(4, '|');
    // Everything before the first pipe, then the seed and restart fields.
    for _ in 0..3 {
        fields.next();
    }
    let rest = fields
        .next()
        .ok_or_else(|| format!("fewer than three '|' in {:?}", rendered))?;

    let token = rest
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '|')
        .next()
        .unwrap_or("");
    if token.is_empty() {
        return Err("empty objective field".to_string());
    }

    let value: f64 = token
        .parse()
        .map_err(|_| format!("objective {:?} is not a number", token))?;
    if !value.is_finite() {
        return Err(format!("objective {} is not finite", value));
    }
    Ok(value)
}

/// Pick the record with the strictly greater objective; ties keep `a`
pub fn arbitrate(a: ResultRecord, b: ResultRecord) -> ProtocolResult<ResultRecord> {
    for record in [&a, &b] {
        if !record.objective.is_finite() {
            return Err(ProtocolError::MalformedResult {
                origin: record.origin,
                reason: format!("objective {} is not finite", record.objective),
            });
        }
    }

    if b.objective > a.objective {
        Ok(b)
    } else {
        Ok(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(seed: u64, rank: usize, objective: &str) -> String {
        format!(
            "|* {}/({}/4) | {:5} | {:>8} | {:8} | {:8} | {:8} | {:8} | {:8.2} |",
            seed, rank, 0, objective, 100, 2, 40, 1, 0.5
        )
    }

    #[test]
    fn test_objective_field() {
        assert_eq!(objective_field(&row(7, 2, "50")).unwrap(), 50.0);
        assert_eq!(objective_field(&row(7, 2, "-3.25")).unwrap(), -3.25);
        assert_eq!(objective_field("|a|b|  12|").unwrap(), 12.0);
        assert_eq!(objective_field("|a|b|9").unwrap(), 9.0);
    }

    #[test]
    fn test_objective_field_rejects() {
        assert!(objective_field("|a|b").is_err());
        assert!(objective_field("|a|b|   |").is_err());
        assert!(objective_field("|a|b| fifty |").is_err());
        assert!(objective_field("|a|b| NaN |").is_err());
        assert!(objective_field("|a|b| inf |").is_err());
    }

    #[test]
    fn test_greater_wins() {
        let a = ResultRecord::from_wire(1, &row(1, 1, "120")).unwrap();
        let b = ResultRecord::from_wire(2, &row(2, 2, "95")).unwrap();
        assert_eq!(arbitrate(a.clone(), b.clone()).unwrap(), a);
        assert_eq!(arbitrate(b, a.clone()).unwrap(), a);
    }

    #[test]
    fn test_tie_keeps_first() {
        let a = ResultRecord::new(3, 50.0, row(1, 3, "50"));
        let b = ResultRecord::new(0, 50.0, row(1, 0, "50"));
        assert_eq!(arbitrate(a.clone(), b.clone()).unwrap().origin, 3);
        assert_eq!(arbitrate(b, a).unwrap().origin, 0);
    }

    #[test]
    fn test_winner_independent_of_order() {
        let candidates = [(0, 10.0), (1, 30.0), (2, 50.0), (3, 20.0)];
        for &(ra, va) in &candidates {
            for &(rb, vb) in &candidates {
                if ra == rb {
                    continue;
                }
                let a = ResultRecord::new(ra, va, "");
                let b = ResultRecord::new(rb, vb, "");
                let forward = arbitrate(a.clone(), b.clone()).unwrap().origin;
                let backward = arbitrate(b, a).unwrap().origin;
                assert_eq!(forward, backward);
            }
        }
    }

    #[test]
    fn test_malformed() {
        let err = ResultRecord::from_wire(2, "no pipes here").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResult { origin: 2, .. }));
        assert_eq!(err.exit_code(), 2);

        let nan = ResultRecord::new(1, f64::NAN, "");
        let ok = ResultRecord::new(0, 1.0, "");
        assert!(arbitrate(ok, nan).is_err());
    }
}
