pub mod records;

pub use records::{read_external_jsonl, read_records_csv, write_labeled_csv};
