//! Calendar helpers for the snapshot's `date_info` block: Arabic weekday
//! labels and a tabular (civil-arithmetic) Hijri conversion.

use chrono::{Datelike, NaiveDate};

use crate::dto::snapshot::{DateInfo, GregorianDate, HijriDate};

const WEEKDAY_LABELS: [&str; 7] = [
    "الاثنين",
    "الثلاثاء",
    "الأربعاء",
    "الخميس",
    "الجمعة",
    "السبت",
    "الأحد",
];

const HIJRI_MONTHS: [&str; 12] = [
    "محرم",
    "صفر",
    "ربيع الأول",
    "ربيع الآخر",
    "جمادى الأولى",
    "جمادى الآخرة",
    "رجب",
    "شعبان",
    "رمضان",
    "شوال",
    "ذو القعدة",
    "ذو الحجة",
];

/// Weekday as stored in the directory: Monday=1 … Sunday=7.
pub fn weekday_number(date: NaiveDate) -> u32 {
    date.weekday().number_from_monday()
}

pub fn date_info_for(date: NaiveDate) -> DateInfo {
    let weekday = weekday_number(date);
    let (hijri_year, hijri_month, hijri_day) = hijri_from_gregorian(date);
    DateInfo {
        gregorian: GregorianDate {
            date: date.format("%Y-%m-%d").to_string(),
            year: date.year(),
            month: date.month(),
            day: date.day(),
            weekday,
            weekday_label: WEEKDAY_LABELS[(weekday - 1) as usize].to_string(),
        },
        hijri: HijriDate {
            date: format!("{hijri_year:04}-{hijri_month:02}-{hijri_day:02}"),
            year: hijri_year,
            month: hijri_month,
            day: hijri_day,
            month_name: HIJRI_MONTHS[(hijri_month - 1) as usize].to_string(),
        },
    }
}

/// Julian day number of a Gregorian date (Fliegel–Van Flandern). The formula
/// is defined over truncating integer division.
fn julian_day(date: NaiveDate) -> i64 {
    let y = i64::from(date.year());
    let m = i64::from(date.month());
    let d = i64::from(date.day());
    let a = (m - 14) / 12;
    (1461 * (y + 4800 + a)) / 4 + (367 * (m - 2 - 12 * a)) / 12
        - (3 * ((y + 4900 + a) / 100)) / 4
        + d
        - 32075
}

/// Tabular Islamic calendar (civil epoch). Matches the printed Umm al-Qura
/// calendar to within a day, which is all the footer display needs.
fn hijri_from_gregorian(date: NaiveDate) -> (i64, i64, i64) {
    let jd = julian_day(date);
    let mut l = jd - 1_948_440 + 10_632;
    let n = (l - 1) / 10_631;
    l = l - 10_631 * n + 354;
    let j = ((10_985 - l) / 5316) * ((50 * l) / 17_719) + (l / 5670) * ((43 * l) / 15_238);
    l = l - ((30 - j) / 15) * ((17_719 * j) / 50) - (j / 16) * ((15_238 * j) / 43) + 29;
    let month = (24 * l) / 709;
    let day = l - (709 * month) / 24;
    let year = 30 * n + j - 30;
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_numbers_follow_directory_convention() {
        // 2025-09-01 is a Monday, 2025-09-07 a Sunday.
        assert_eq!(
            weekday_number(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()),
            1
        );
        assert_eq!(
            weekday_number(NaiveDate::from_ymd_opt(2025, 9, 7).unwrap()),
            7
        );
    }

    #[test]
    fn hijri_epoch_is_muharram_first() {
        // 1 Muharram 1 AH: 16 July 622 Julian = 19 July 622 proleptic Gregorian.
        let (y, m, d) = hijri_from_gregorian(NaiveDate::from_ymd_opt(622, 7, 19).unwrap());
        assert_eq!((y, m, d), (1, 1, 1));
    }

    #[test]
    fn known_conversion_is_close() {
        // 2024-03-11 was announced as 1 Ramadan 1445.
        let (y, m, d) = hijri_from_gregorian(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!((y, m, d), (1445, 9, 1));
    }

    #[test]
    fn date_info_is_fully_populated() {
        let info = date_info_for(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(info.gregorian.date, "2025-09-01");
        assert_eq!(info.gregorian.weekday_label, "الاثنين");
        assert!(!info.hijri.month_name.is_empty());
        assert!((1..=12).contains(&info.hijri.month));
        assert!((1..=30).contains(&info.hijri.day));
    }
}
