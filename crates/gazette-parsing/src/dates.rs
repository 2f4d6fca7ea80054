use chrono::NaiveDate;

use crate::text_processing::fold_accents;

/// Month number for a Portuguese month name, accent- and case-insensitive.
pub fn month_from_name(name: &str) -> Option<u32> {
    let month = match fold_accents(name.trim()).as_str() {
        "janeiro" => 1,
        "fevereiro" => 2,
        "marco" => 3,
        "abril" => 4,
        "maio" => 5,
        "junho" => 6,
        "julho" => 7,
        "agosto" => 8,
        "setembro" => 9,
        "outubro" => 10,
        "novembro" => 11,
        "dezembro" => 12,
        _ => return None,
    };
    Some(month)
}

/// Build a date from captured day, month (number or name) and year.
/// Invalid calendar dates yield `None`.
pub fn date_from_parts(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    let day: u32 = day.trim().parse().ok()?;
    let year: i32 = year.trim().parse().ok()?;
    let month = match month.trim().parse::<u32>() {
        Ok(m) => m,
        Err(_) => month_from_name(month)?,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Format a date as the portal's search form expects it (`dd/mm/yyyy`).
pub fn format_form_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_names_ignore_accents_and_case() {
        assert_eq!(month_from_name("Março"), Some(3));
        assert_eq!(month_from_name("MARCO"), Some(3));
        assert_eq!(month_from_name("dezembro"), Some(12));
        assert_eq!(month_from_name("december"), None);
    }

    #[test]
    fn rejects_impossible_dates() {
        assert_eq!(date_from_parts("31", "02", "2024"), None);
        assert_eq!(date_from_parts("29", "fevereiro", "2023"), None);
        assert_eq!(
            date_from_parts("29", "fevereiro", "2024"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }

    #[test]
    fn form_dates_are_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(format_form_date(date), "05/03/2024");
    }
}
