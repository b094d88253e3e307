//! CSV loading of cleaned listings.
//!
//! ## Format
//!
//! ```csv
//! id,name,host_id,host_name,neighbourhood,latitude,longitude,room_type,price,...
//! 13913,Holiday London DB Room,54730,Alina,Islington,51.56861,-0.1127,Private room,79.0,...
//! ```
//!
//! Columns are located by header name, so their order in the file is free.
//! Every one of the sixteen destination columns must be present. Cell values
//! are coerced leniently: a value that does not parse becomes null and is
//! counted, it never fails the row. Only a missing or non-integer `id`
//! rejects a row.

use crate::error::SourceError;
use crate::model::{
    coerce_date, coerce_float, coerce_int, coerce_text, Listing, LISTING_COLUMNS,
};
use csv::StringRecord;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Counters for one pass over the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub rows_read: usize,
    /// Rows dropped for a missing or non-integer `id`.
    pub rows_rejected: usize,
    /// Non-empty cells that failed to parse and were loaded as null.
    pub values_coerced_to_null: usize,
}

/// Header position of each destination column.
#[derive(Debug, Clone, Copy)]
struct ColumnIndex([usize; 16]);

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self, SourceError> {
        let mut positions = [0usize; 16];
        for (slot, column) in positions.iter_mut().zip(LISTING_COLUMNS.iter()) {
            *slot = headers
                .iter()
                .position(|header| header.trim() == *column)
                .ok_or_else(|| SourceError::MissingColumn(column.to_string()))?;
        }
        Ok(Self(positions))
    }
}

/// Streaming iterator of listings from a CSV source.
pub struct ListingReader<R> {
    reader: csv::Reader<R>,
    columns: ColumnIndex,
    record: StringRecord,
    stats: SourceStats,
}

impl ListingReader<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path.as_ref())?;
        Self::new(file)
    }
}

impl<R: Read> ListingReader<R> {
    pub fn new(input: R) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
        let columns = ColumnIndex::from_headers(reader.headers()?)?;
        Ok(Self {
            reader,
            columns,
            record: StringRecord::new(),
            stats: SourceStats::default(),
        })
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    fn cell(&self, column: usize) -> &str {
        self.record.get(self.columns.0[column]).unwrap_or("")
    }

    fn text(&mut self, column: usize) -> Option<String> {
        coerce_text(self.cell(column))
    }

    fn int(&mut self, column: usize) -> Option<i64> {
        let raw = self.cell(column);
        let value = coerce_int(raw);
        if value.is_none() && coerce_text(raw).is_some() {
            self.stats.values_coerced_to_null += 1;
        }
        value
    }

    fn float(&mut self, column: usize) -> Option<f64> {
        let raw = self.cell(column);
        let value = coerce_float(raw);
        if value.is_none() && coerce_text(raw).is_some() {
            self.stats.values_coerced_to_null += 1;
        }
        value
    }

    fn date(&mut self, column: usize) -> Option<time::Date> {
        let raw = self.cell(column);
        let value = coerce_date(raw);
        if value.is_none() && coerce_text(raw).is_some() {
            debug!(value = raw, "Unparsable last_review loaded as null");
            self.stats.values_coerced_to_null += 1;
        }
        value
    }

    fn current_listing(&mut self) -> Option<Listing> {
        let id = coerce_int(self.cell(0))?;
        Some(Listing {
            id,
            name: self.text(1),
            host_id: self.int(2),
            host_name: self.text(3),
            neighbourhood: self.text(4),
            latitude: self.float(5),
            longitude: self.float(6),
            room_type: self.text(7),
            price: self.int(8),
            minimum_nights: self.int(9),
            number_of_reviews: self.int(10),
            last_review: self.date(11),
            reviews_per_month: self.float(12),
            calculated_host_listings_count: self.int(13),
            availability_365: self.int(14),
            number_of_reviews_ltm: self.int(15),
        })
    }
}

impl<R: Read> Iterator for ListingReader<R> {
    type Item = Result<Listing, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => return None,
                Ok(true) => {}
                Err(err) => return Some(Err(err.into())),
            }
            self.stats.rows_read += 1;
            match self.current_listing() {
                Some(listing) => return Some(Ok(listing)),
                None => {
                    self.stats.rows_rejected += 1;
                    let line = self.record.position().map(|pos| pos.line()).unwrap_or(0);
                    warn!(line, id = self.cell(0), "Rejected row without a valid id");
                }
            }
        }
    }
}

/// Read every listing from `path`.
pub fn read_listings(path: impl AsRef<Path>) -> Result<(Vec<Listing>, SourceStats), SourceError> {
    let mut reader = ListingReader::from_path(path)?;
    let mut listings = Vec::new();
    for listing in reader.by_ref() {
        listings.push(listing?);
    }
    let stats = reader.stats();
    if stats.rows_rejected > 0 || stats.values_coerced_to_null > 0 {
        warn!(
            rejected = stats.rows_rejected,
            coerced = stats.values_coerced_to_null,
            "Input contained unusable values"
        );
    }
    Ok((listings, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use time::{Date, Month};

    const HEADER: &str = "id,name,host_id,host_name,neighbourhood,latitude,longitude,room_type,price,minimum_nights,number_of_reviews,last_review,reviews_per_month,calculated_host_listings_count,availability_365,number_of_reviews_ltm";

    fn reader(body: &str) -> ListingReader<Cursor<Vec<u8>>> {
        let input = format!("{HEADER}\n{body}");
        ListingReader::new(Cursor::new(input.into_bytes())).unwrap()
    }

    #[test]
    fn parses_a_full_row() {
        let mut rows = reader(
            "13913,Holiday London Room,54730,Alina,Islington,51.56861,-0.1127,Private room,79.0,1,41,2023-06-04,0.26,3,363,4\n",
        );
        let listing = rows.next().unwrap().unwrap();
        assert_eq!(listing.id, 13913);
        assert_eq!(listing.neighbourhood.as_deref(), Some("Islington"));
        assert_eq!(listing.price, Some(79));
        assert_eq!(listing.latitude, Some(51.56861));
        assert_eq!(
            listing.last_review,
            Some(Date::from_calendar_date(2023, Month::June, 4).unwrap())
        );
        assert_eq!(listing.number_of_reviews_ltm, Some(4));
        assert!(rows.next().is_none());
        assert_eq!(rows.stats().rows_read, 1);
    }

    #[test]
    fn missing_values_become_null() {
        let mut rows = reader("7,,,,Camden,,,,,,,,,,,\n");
        let listing = rows.next().unwrap().unwrap();
        assert_eq!(listing, Listing::new(7, Some("Camden")));
        assert_eq!(rows.stats().values_coerced_to_null, 0);
    }

    #[test]
    fn unparsable_values_are_coerced_and_counted() {
        let mut rows = reader("8,Flat,x,Bo,Brent,north,0.1,Entire home,cheap,2,3,someday,NaN,1,365,0\n");
        let listing = rows.next().unwrap().unwrap();
        assert_eq!(listing.host_id, None);
        assert_eq!(listing.latitude, None);
        assert_eq!(listing.price, None);
        assert_eq!(listing.last_review, None);
        assert_eq!(listing.reviews_per_month, None);
        assert_eq!(rows.stats().values_coerced_to_null, 4);
    }

    #[test]
    fn rows_without_id_are_rejected() {
        let rows: Vec<_> = reader(",A,1,B,Camden,,,,,,,,,,,\n2,A,1,B,Camden,,,,,,,,,,,\n")
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 2);
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = ListingReader::new("id,name\n1,x\n".as_bytes()).err().unwrap();
        assert!(matches!(err, SourceError::MissingColumn(column) if column == "host_id"));
    }

    #[test]
    fn column_order_is_free() {
        let reordered = "neighbourhood,id,name,host_id,host_name,latitude,longitude,room_type,price,minimum_nights,number_of_reviews,last_review,reviews_per_month,calculated_host_listings_count,availability_365,number_of_reviews_ltm\nHackney,99,,,,,,,,,,,,,,\n";
        let mut rows = ListingReader::new(reordered.as_bytes()).unwrap();
        let listing = rows.next().unwrap().unwrap();
        assert_eq!(listing.id, 99);
        assert_eq!(listing.neighbourhood.as_deref(), Some("Hackney"));
    }
}
