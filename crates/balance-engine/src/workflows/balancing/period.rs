use super::selection::SelectionError;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::iter::FusedIterator;

/// A reporting month. Orders by year, then month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, SelectionError> {
        if !(1..=12).contains(&month) {
            return Err(SelectionError::InvalidMonth { month });
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub const fn year(self) -> i32 {
        self.year
    }

    pub const fn month(self) -> u32 {
        self.month
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Steps back `months`, rolling into earlier years.
    pub fn minus_months(self, months: u32) -> Self {
        let index = self.year * 12 + self.month as i32 - 1 - months as i32;
        Self {
            year: index.div_euclid(12),
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    /// `YYYY-MM`, the stamp used in registry file names.
    pub fn stamp(self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// An inclusive, non-empty run of periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodRange {
    start: Period,
    end: Period,
}

impl PeriodRange {
    pub fn new(start: Period, end: Period) -> Result<Self, SelectionError> {
        if end < start {
            return Err(SelectionError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> Period {
        self.start
    }

    pub const fn end(&self) -> Period {
        self.end
    }

    pub fn iter(&self) -> PeriodIter {
        PeriodIter {
            next: Some(self.start),
            end: self.end,
        }
    }

    pub fn len(&self) -> usize {
        let months = (self.end.year - self.start.year) * 12 + self.end.month as i32
            - self.start.month as i32;
        months as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl IntoIterator for PeriodRange {
    type Item = Period;
    type IntoIter = PeriodIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy forward walk over a [`PeriodRange`].
#[derive(Debug, Clone)]
pub struct PeriodIter {
    next: Option<Period>,
    end: Period,
}

impl Iterator for PeriodIter {
    type Item = Period;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = (current < self.end).then(|| current.next());
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .next
            .map(|next| PeriodRange { start: next, end: self.end }.len())
            .unwrap_or(0);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PeriodIter {}

impl FusedIterator for PeriodIter {}

/// Periods from `start_month/start_year` through `end_month/end_year`.
pub fn month_year_iter(
    start_month: u32,
    start_year: i32,
    end_month: u32,
    end_year: i32,
) -> Result<PeriodIter, SelectionError> {
    let range = PeriodRange::new(
        Period::new(start_year, start_month)?,
        Period::new(end_year, end_month)?,
    )?;
    Ok(range.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(year: i32, month: u32) -> Period {
        Period::new(year, month).expect("valid period")
    }

    #[test]
    fn iterator_rolls_over_year_boundary() {
        let periods: Vec<Period> = month_year_iter(1, 2020, 3, 2021).expect("range").collect();
        assert_eq!(periods.len(), 15);
        assert_eq!(periods.first(), Some(&period(2020, 1)));
        assert_eq!(periods.last(), Some(&period(2021, 3)));
        assert!(periods.windows(2).all(|pair| pair[0] < pair[1]));

        let december = periods
            .iter()
            .position(|p| *p == period(2020, 12))
            .expect("december present");
        assert_eq!(periods[december + 1], period(2021, 1));
    }

    #[test]
    fn single_period_range_yields_once() {
        let mut iter = month_year_iter(6, 2015, 6, 2015).expect("range");
        assert_eq!(iter.len(), 1);
        assert_eq!(iter.next(), Some(period(2015, 6)));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn end_before_start_is_rejected() {
        let error = month_year_iter(2, 2021, 1, 2021).expect_err("reversed range");
        assert!(matches!(error, SelectionError::InvalidRange { .. }));
    }

    #[test]
    fn month_outside_calendar_is_rejected() {
        assert!(matches!(
            Period::new(2020, 13),
            Err(SelectionError::InvalidMonth { month: 13 })
        ));
        assert!(Period::new(2020, 0).is_err());
    }

    #[test]
    fn minus_months_steps_into_previous_year() {
        assert_eq!(period(2023, 2).minus_months(2), period(2022, 12));
        assert_eq!(period(2023, 5).minus_months(2), period(2023, 3));
        assert_eq!(period(2023, 1).minus_months(25), period(2020, 12));
    }

    #[test]
    fn stamp_is_zero_padded() {
        assert_eq!(period(2022, 3).stamp(), "2022-03");
        assert_eq!(period(2022, 11).to_string(), "2022-11");
    }

    #[test]
    fn range_length_matches_iteration() {
        let range = PeriodRange::new(period(2015, 1), period(2022, 12)).expect("range");
        assert_eq!(range.len(), 96);
        assert_eq!(range.iter().count(), 96);
    }
}
