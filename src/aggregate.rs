//! Aggregator: sums the measure field of every record per partition key.
//!
//! Records are comma separated. The partition key is the first eight
//! characters of field 0, the measure is field 3 parsed as a float.

use crate::Accumulator;

/// Length of the partition key, in characters.
pub const KEY_CHARS: usize = 8;
/// Zero-based index of the measure field.
pub const MEASURE_FIELD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// Fewer than `MEASURE_FIELD + 1` fields.
    TooFewFields,
    /// The measure field is not a finite number.
    BadMeasure,
}

/// Splits one record into its partition key and measure.
pub fn parse_record(line: &str) -> Result<(&str, f64), RecordError> {
    let mut fields = line.split(',');
    let first = fields.next().unwrap_or_default();
    let measure = fields.nth(MEASURE_FIELD - 1).ok_or(RecordError::TooFewFields)?;
    let measure = measure.trim().parse::<f64>().map_err(|_| RecordError::BadMeasure)?;
    if !measure.is_finite() {
        return Err(RecordError::BadMeasure);
    }
    let key = match first.char_indices().nth(KEY_CHARS) {
        Some((end, _)) => &first[..end],
        None => first,
    };
    Ok((key, measure))
}

/// Accumulates records into a running sum per key.
#[derive(Debug, Default)]
pub struct Aggregator {
    sums: Accumulator,
    records: u64,
    parse_errors: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every record of a newline-delimited blob. A trailing newline
    /// does not produce an extra record and blank lines are skipped.
    /// Malformed records are counted and skipped.
    pub fn add_blob(&mut self, contents: &str) {
        for line in contents.lines().filter(|line| !line.is_empty()) {
            self.records += 1;
            match parse_record(line) {
                Ok((key, measure)) => *self.sums.entry(key.to_string()).or_insert(0.0) += measure,
                Err(_) => self.parse_errors += 1,
            }
        }
    }

    /// Non-empty lines seen, malformed ones included.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    pub fn finish(self) -> Accumulator {
        self.sums
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_per_key_prefix() {
        let mut agg = Aggregator::new();
        agg.add_blob("aaaaaaaa01,x,y,10\naaaaaaaa02,x,y,5\nbbbbbbbb01,x,y,3\n");
        assert_eq!(agg.records(), 3);
        assert_eq!(agg.parse_errors(), 0);
        let sums = agg.finish();
        assert_eq!(sums.len(), 2);
        assert_eq!(sums["aaaaaaaa"], 15.0);
        assert_eq!(sums["bbbbbbbb"], 3.0);
    }

    #[test]
    fn malformed_lines_are_counted_and_skipped() {
        let mut agg = Aggregator::new();
        agg.add_blob("aaaaaaaa01,x,y,10\nshort,line\naaaaaaaa02,x,y,oops\naaaaaaaa03,x,y,2.5");
        assert_eq!(agg.records(), 4);
        assert_eq!(agg.parse_errors(), 2);
        assert_eq!(agg.finish()["aaaaaaaa"], 12.5);
    }

    #[test]
    fn sums_accumulate_across_blobs() {
        let mut agg = Aggregator::new();
        agg.add_blob("10.0.0.1:80,a,b,1\n");
        agg.add_blob("10.0.0.1:443,a,b,2\r\n10.0.0.2,a,b,4\n");
        let sums = agg.finish();
        assert_eq!(sums["10.0.0.1"], 3.0);
        assert_eq!(sums["10.0.0.2"], 4.0);
    }

    #[test]
    fn short_key_field_is_kept_whole() {
        assert_eq!(parse_record("abc,1,2,7"), Ok(("abc", 7.0)));
        let (key, _) = parse_record("ääääääääää,1,2,7").unwrap();
        assert_eq!(key.chars().count(), KEY_CHARS);
        assert_eq!(parse_record("abc,1,2"), Err(RecordError::TooFewFields));
        assert_eq!(parse_record("abc,1,2, 4.5 ,extra"), Ok(("abc", 4.5)));
    }

    #[test]
    fn non_finite_measures_are_malformed() {
        for measure in ["nan", "NaN", "inf", "-infinity"] {
            assert_eq!(parse_record(&format!("abc,1,2,{measure}")), Err(RecordError::BadMeasure));
        }
        let mut agg = Aggregator::new();
        agg.add_blob("aaaaaaaa,x,y,nan\naaaaaaaa,x,y,inf\naaaaaaaa,x,y,2\n");
        assert_eq!(agg.records(), 3);
        assert_eq!(agg.parse_errors(), 2);
        assert_eq!(agg.finish()["aaaaaaaa"], 2.0);
    }

    #[test]
    fn empty_blob_yields_nothing() {
        let mut agg = Aggregator::new();
        agg.add_blob("");
        agg.add_blob("\n");
        assert_eq!(agg.records(), 0);
        assert!(agg.finish().is_empty());
    }
}
