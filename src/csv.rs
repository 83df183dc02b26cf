use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::engine::InMemoryBackend;
use crate::model::{PromoterId, StaffId, SubjectId, VenueId};

/// Errors that can occur when reading the seed csv
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open seed file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized seed kind '{kind}'")]
    UnrecognizedKind { line: usize, kind: String },

    #[error("line {line}: {kind} amount {amount} must not be negative")]
    InvalidAmount {
        line: usize,
        kind: String,
        amount: Amount,
    },

    #[error("line {line}: {kind} missing {field}")]
    MissingField {
        line: usize,
        kind: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    kind: String,
    id: String,
    venue: Option<VenueId>,
    amount: Option<f64>,
    code: Option<String>,
    label: Option<String>,
    credits: Option<u32>,
}

/// One row of reference data loaded before requests are served.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedRecord {
    /// A known subject, with an opening balance if one is given.
    Subject {
        id: SubjectId,
        label: String,
        balance: Option<Amount>,
    },
    Operator { staff: StaffId, venue: VenueId },
    Shift { staff: StaffId, venue: VenueId },
    Admin { staff: StaffId },
    Promoter { id: PromoterId, code: String },
    /// Billing settings of a venue; unset fields keep the defaults.
    Venue {
        id: VenueId,
        base_surcharge: Option<Amount>,
        waiver_credits: Option<u32>,
    },
    SurchargeOverride { venue: VenueId, surcharge: Amount },
}

fn missing(line: usize, kind: &str, field: &'static str) -> CsvError {
    CsvError::MissingField {
        line,
        kind: kind.to_string(),
        field,
    }
}

impl SeedRow {
    fn checked_amount(&self, line: usize) -> Result<Option<Amount>, CsvError> {
        match self.amount.map(Amount::from_float) {
            Some(amount) if amount.is_negative() => Err(CsvError::InvalidAmount {
                line,
                kind: self.kind.clone(),
                amount,
            }),
            amount => Ok(amount),
        }
    }

    fn into_record(self, line: usize) -> Result<SeedRecord, CsvError> {
        let amount = self.checked_amount(line)?;
        let kind = self.kind.as_str();
        let record = match kind {
            "subject" => SeedRecord::Subject {
                label: self.label.unwrap_or_else(|| self.id.clone()),
                balance: amount,
                id: self.id,
            },
            "operator" => SeedRecord::Operator {
                venue: self.venue.ok_or_else(|| missing(line, kind, "venue"))?,
                staff: self.id,
            },
            "shift" => SeedRecord::Shift {
                venue: self.venue.ok_or_else(|| missing(line, kind, "venue"))?,
                staff: self.id,
            },
            "admin" => SeedRecord::Admin { staff: self.id },
            "promoter" => SeedRecord::Promoter {
                code: self.code.ok_or_else(|| missing(line, kind, "code"))?,
                id: self.id,
            },
            "venue" => SeedRecord::Venue {
                base_surcharge: amount,
                waiver_credits: self.credits,
                id: self.id,
            },
            "override" => SeedRecord::SurchargeOverride {
                surcharge: amount.ok_or_else(|| missing(line, kind, "amount"))?,
                venue: self.id,
            },
            other => {
                return Err(CsvError::UnrecognizedKind {
                    line,
                    kind: other.to_string(),
                });
            }
        };
        Ok(record)
    }
}

/// Read seed records from a csv file with header
/// `kind,id,venue,amount,code,label,credits`. Amounts are in major units.
pub fn read_seed(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<SeedRecord, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<SeedRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_record(line)
        }))
}

/// Load one seed record into the in-memory stores.
pub async fn apply_seed(backend: &InMemoryBackend, record: SeedRecord) {
    match record {
        SeedRecord::Subject { id, label, balance } => {
            backend.directory.register_subject(id.clone(), label).await;
            if let Some(balance) = balance {
                backend.ledger.seed(id, balance).await;
            }
        }
        SeedRecord::Operator { staff, venue } => {
            backend.directory.assign_operator(staff, venue).await;
        }
        SeedRecord::Shift { staff, venue } => backend.directory.start_shift(staff, venue).await,
        SeedRecord::Admin { staff } => backend.directory.grant_admin(staff).await,
        SeedRecord::Promoter { id, code } => backend.promoters.register(id, code).await,
        SeedRecord::Venue {
            id,
            base_surcharge,
            waiver_credits,
        } => {
            let mut config = match backend.billing.get(&id).await {
                Some(config) => config,
                None => backend.billing.defaults_for(&id),
            };
            if let Some(base) = base_surcharge {
                config.base_surcharge = base;
            }
            if let Some(credits) = waiver_credits {
                config.waiver_credits = credits;
            }
            backend.billing.upsert(config).await;
        }
        SeedRecord::SurchargeOverride { venue, surcharge } => {
            let mut config = match backend.billing.get(&venue).await {
                Some(config) => config,
                None => backend.billing.defaults_for(&venue),
            };
            config.surcharge_override = Some(surcharge);
            backend.billing.upsert(config).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use crate::access::VenueAuthorizer;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "kind,id,venue,amount,code,label,credits\n";

    fn write_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        file
    }

    fn read(rows: &str) -> Vec<Result<SeedRecord, CsvError>> {
        let file = write_csv(rows);
        read_seed(file.path()).unwrap().collect()
    }

    #[test]
    fn read_subject_with_balance() {
        let results = read("subject,cust-1,,50.00,,Ada L.,\n");
        assert_eq!(
            results.into_iter().next().unwrap().unwrap(),
            SeedRecord::Subject {
                id: "cust-1".into(),
                label: "Ada L.".into(),
                balance: Some(Amount::from_minor(5_000)),
            }
        );
    }

    #[test]
    fn subject_label_defaults_to_id() {
        let results = read("subject,cust-2,,,,,\n");
        match results.into_iter().next().unwrap().unwrap() {
            SeedRecord::Subject { label, balance, .. } => {
                assert_eq!(label, "cust-2");
                assert_eq!(balance, None);
            }
            other => panic!("expected subject, got {other:?}"),
        }
    }

    #[test]
    fn read_with_whitespace() {
        let results = read("operator, staff-1, venue-1, , , ,\n");
        assert_eq!(
            results[0].as_ref().unwrap(),
            &SeedRecord::Operator {
                staff: "staff-1".into(),
                venue: "venue-1".into(),
            }
        );
    }

    #[test]
    fn read_venue_settings() {
        let results = read("venue,venue-1,,0.25,,,3\noverride,venue-2,,0.05,,,\n");
        assert_eq!(
            results[0].as_ref().unwrap(),
            &SeedRecord::Venue {
                id: "venue-1".into(),
                base_surcharge: Some(Amount::from_minor(25)),
                waiver_credits: Some(3),
            }
        );
        assert_eq!(
            results[1].as_ref().unwrap(),
            &SeedRecord::SurchargeOverride {
                venue: "venue-2".into(),
                surcharge: Amount::from_minor(5),
            }
        );
    }

    #[test]
    fn read_returns_error_for_unknown_kind() {
        let results = read("refund,x,,,,,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedKind { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_field() {
        let results = read("promoter,promo-1,,,,,\noperator,staff-1,,,,,\n");
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            CsvError::MissingField { line: 2, field: "code", .. }
        ));
        assert!(matches!(
            results[1].as_ref().unwrap_err(),
            CsvError::MissingField { line: 3, field: "venue", .. }
        ));
    }

    #[test]
    fn read_returns_error_for_negative_amounts() {
        let results = read(
            "subject,cust-1,,-5.00,,Ada L.,\n\
             venue,venue-1,,-0.20,,,\n\
             override,venue-2,,-0.01,,,\n\
             venue,venue-3,,0.00,,,\n",
        );
        for (idx, result) in results[..3].iter().enumerate() {
            let err = result.as_ref().unwrap_err();
            assert!(
                matches!(err, CsvError::InvalidAmount { line, .. } if *line == idx + 2),
                "{err}"
            );
        }
        assert!(results[3].is_ok());
        assert!(results[0]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("subject amount -5.00 must not be negative"));
    }

    #[tokio::test]
    async fn negative_rows_are_not_loaded() {
        let backend = InMemoryBackend::new(&EngineConfig::default());
        let file = write_csv("subject,cust-1,,-5.00,,Ada L.,\nvenue,venue-1,,-0.20,,,\n");
        for record in read_seed(file.path()).unwrap().flatten() {
            apply_seed(&backend, record).await;
        }
        assert!(backend.ledger.balances().await.is_empty());
        assert!(backend.billing.get("venue-1").await.is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            read_seed("/nonexistent/seed.csv"),
            Err(CsvError::Open(_))
        ));
    }

    #[tokio::test]
    async fn apply_loads_backend() {
        let backend = InMemoryBackend::new(&EngineConfig::default());
        let file = write_csv(
            "subject,cust-1,,12.50,,Ada L.,\n\
             operator,staff-1,venue-1,,,,\n\
             promoter,promo-1,,,NOVA,,\n\
             venue,venue-1,,,,,2\n\
             override,venue-1,,0.05,,,\n",
        );
        for record in read_seed(file.path()).unwrap() {
            apply_seed(&backend, record.unwrap()).await;
        }

        assert_eq!(
            backend.ledger.balances().await[0].amount,
            Amount::from_minor(1_250)
        );
        assert!(backend.directory.is_permitted("staff-1", "venue-1").await.unwrap());
        assert!(backend.promoters.get("promo-1").await.is_some());

        let billing = backend.billing.get("venue-1").await.unwrap();
        assert_eq!(billing.waiver_credits, 2);
        assert_eq!(billing.surcharge_override, Some(Amount::from_minor(5)));
        assert_eq!(billing.base_surcharge, Amount::from_minor(20));
    }
}
