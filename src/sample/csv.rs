use ::csv;
use serde::{Serialize, Deserialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use crate::error::ValidationError;
use super::Data;

/// One row of a subject table. Column names follow the group,trials,correct
/// header; the cond/n_trials/n_correct spellings are accepted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {

    #[serde(alias = "cond")]
    pub group : i64,

    #[serde(alias = "n_trials")]
    pub trials : i64,

    #[serde(alias = "n_correct")]
    pub correct : i64

}

impl Data {

    /// Parses a delimited table with a header row. Rows are counted from 1,
    /// excluding the header.
    pub fn from_reader<R : Read>(rdr : R) -> Result<Self, ValidationError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(rdr);
        let (mut groups, mut trials, mut correct) = (Vec::new(), Vec::new(), Vec::new());
        for (ix, rec) in csv_reader.deserialize::<Record>().enumerate() {
            let rec = rec.map_err(|e| ValidationError::Csv { row : ix + 1, msg : format!("{}", e) })?;
            groups.push(rec.group);
            trials.push(rec.trials);
            correct.push(rec.correct);
        }
        Data::load(&groups[..], &trials[..], &correct[..])
    }

    pub fn open<P : AsRef<Path>>(path : P) -> Result<Self, ValidationError> {
        let f = File::open(path.as_ref())
            .map_err(|e| ValidationError::Io(format!("{}: {}", path.as_ref().display(), e)) )?;
        Self::from_reader(f)
    }

    /// Subject rows carrying the original group labels.
    pub fn records(&self) -> Vec<Record> {
        let labels = self.group_labels();
        self.subjects().iter()
            .map(|s| Record {
                group : labels[s.group],
                trials : s.n_trials as i64,
                correct : s.n_correct as i64
            })
            .collect()
    }

    pub fn write_csv<W : Write>(&self, w : W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(w);
        for rec in self.records() {
            wtr.serialize(rec)?;
        }
        wtr.flush()?;
        Ok(())
    }

}

#[test]
fn read_table_with_header() {
    let content = "group, trials, correct\n1, 20, 12\n1, 20, 13\n2, 20, 9\n";
    let data = Data::from_reader(content.as_bytes()).unwrap();
    assert_eq!(data.n_subjects(), 3);
    assert_eq!(data.n_groups(), 2);
    assert_eq!(data.n_correct(1), Some(13));
    assert_eq!(data.group_of(2), Some(1));
}

#[test]
fn read_table_with_alternative_header() {
    let content = "cond,n_trials,n_correct\n0,5,5\n3,5,0\n";
    let data = Data::from_reader(content.as_bytes()).unwrap();
    assert_eq!(data.group_labels(), &[0, 3]);
    assert_eq!(data.n_correct(0), Some(5));
}

#[test]
fn bad_row_reports_its_position() {
    let content = "group,trials,correct\n0,10,3\n0,ten,3\n";
    match Data::from_reader(content.as_bytes()) {
        Err(ValidationError::Csv { row, .. }) => assert_eq!(row, 2),
        other => panic!("Unexpected result: {:?}", other)
    }
}

#[test]
fn written_table_reads_back() {
    let data = Data::load(&[4, 4, 9], &[20, 20, 20], &[0, 20, 11]).unwrap();
    let mut buf = Vec::new();
    data.write_csv(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.starts_with("group,trials,correct\n4,20,0\n"));
    assert_eq!(Data::from_reader(text.as_bytes()).unwrap(), data);
}
