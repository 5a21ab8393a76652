use super::period::{Period, PeriodRange};
use serde::Serialize;
use thiserror::Error;

/// Rejections raised while validating a run request, before any file is read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("month {month} is outside 1-12")]
    InvalidMonth { month: u32 },
    #[error("year {year} is outside {min}-{max}")]
    YearOutOfBounds { year: i32, min: i32, max: i32 },
    #[error("end period {end} precedes start period {start}")]
    InvalidRange { start: Period, end: Period },
    #[error("facility '{0}' was entered more than once")]
    DuplicateFacility(String),
    #[error("facility identifiers cannot be blank")]
    BlankFacility,
}

/// Earliest and latest year a period may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearBounds {
    pub min: i32,
    pub max: i32,
}

impl YearBounds {
    pub fn check(&self, period: Period) -> Result<Period, SelectionError> {
        if period.year() < self.min || period.year() > self.max {
            return Err(SelectionError::YearOutOfBounds {
                year: period.year(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(period)
    }
}

/// Facilities a run is restricted to, uppercased, in entry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilityAllowList {
    facilities: Vec<String>,
}

impl FacilityAllowList {
    pub fn new<I, S>(facilities: I) -> Result<Self, SelectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut accepted: Vec<String> = Vec::new();
        for facility in facilities {
            let facility = facility.as_ref().trim().to_ascii_uppercase();
            if facility.is_empty() {
                return Err(SelectionError::BlankFacility);
            }
            if accepted.contains(&facility) {
                return Err(SelectionError::DuplicateFacility(facility));
            }
            accepted.push(facility);
        }
        Ok(Self {
            facilities: accepted,
        })
    }

    pub fn contains(&self, facility_id: &str) -> bool {
        self.facilities
            .iter()
            .any(|facility| facility.eq_ignore_ascii_case(facility_id.trim()))
    }

    pub fn facilities(&self) -> &[String] {
        &self.facilities
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }
}

/// A validated multi-period request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSelection {
    pub range: PeriodRange,
    pub facilities: Option<FacilityAllowList>,
}

impl RunSelection {
    /// Validates `(month, year)` pairs and facility identifiers. An empty
    /// facility list means "all facilities".
    pub fn new(
        start: (u32, i32),
        end: (u32, i32),
        facilities: &[String],
        bounds: YearBounds,
    ) -> Result<Self, SelectionError> {
        let start = bounds.check(Period::new(start.1, start.0)?)?;
        let end = bounds.check(Period::new(end.1, end.0)?)?;
        let range = PeriodRange::new(start, end)?;

        let facilities = if facilities.is_empty() {
            None
        } else {
            Some(FacilityAllowList::new(facilities)?)
        };

        Ok(Self { range, facilities })
    }
}
