use std::io::Write;

use gazette_core::{ClassificationDecision, ExtractedFields, ProgressEvent};
use gazette_parsing::format_brl;
use gazette_scraper::{JobSummary, RunSummary};
use owo_colors::OwoColorize;
use rust_decimal::Decimal;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// One line for events worth keeping in the scrollback. Spinner-only events
/// return `None`.
pub fn progress_line(event: &ProgressEvent, color: ColorMode) -> Option<String> {
    let line = match event {
        ProgressEvent::DayStarted {
            date,
            day,
            total_days,
        } => {
            let text = format!("── {} ({}/{}) ──", date.format("%d/%m/%Y"), day, total_days);
            if color.enabled() {
                text.bold().to_string()
            } else {
                text
            }
        }
        ProgressEvent::Stored { case_number, id } => {
            if color.enabled() {
                format!("{} {} (#{})", "[STORED]".green().bold(), case_number, id)
            } else {
                format!("[STORED] {} (#{})", case_number, id)
            }
        }
        ProgressEvent::Rejected { case_number, score } => {
            if color.enabled() {
                format!(
                    "{} {} (score {:.2})",
                    "[REJECTED]".yellow(),
                    case_number,
                    score
                )
                .dimmed()
                .to_string()
            } else {
                format!("[REJECTED] {} (score {:.2})", case_number, score)
            }
        }
        ProgressEvent::Duplicate { case_number } => {
            if color.enabled() {
                format!("[DUPLICATE] {}", case_number).dimmed().to_string()
            } else {
                format!("[DUPLICATE] {}", case_number)
            }
        }
        ProgressEvent::ItemSkipped {
            anchor,
            reason,
            detail,
        } => {
            if color.enabled() {
                format!(
                    "{} {} [{}] {}",
                    "[SKIPPED]".red(),
                    anchor,
                    reason.as_str(),
                    detail.dimmed()
                )
            } else {
                format!("[SKIPPED] {} [{}] {}", anchor, reason.as_str(), detail)
            }
        }
        ProgressEvent::PageLoaded { .. }
        | ProgressEvent::ItemResolved { .. }
        | ProgressEvent::Percent(_) => return None,
    };
    Some(line)
}

/// Short status for the spinner.
pub fn spinner_message(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::PageLoaded { page_index, items } => {
            Some(format!("Results page {} ({} items)", page_index, items))
        }
        ProgressEvent::ItemResolved { anchor, kind } => {
            Some(format!("Read {} ({})", anchor, kind.as_str()))
        }
        ProgressEvent::Percent(p) => Some(format!("{}% of days searched", p)),
        _ => None,
    }
}

/// Print the totals of an `extract` run.
pub fn print_run_summary(
    w: &mut dyn Write,
    summary: &RunSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Summary".bold())?;
    } else {
        writeln!(w, "Summary")?;
    }
    writeln!(
        w,
        "  {} pages, {} items read",
        summary.pages, summary.items
    )?;
    count_line(w, "Stored", summary.extracted, color, Tone::Good)?;
    count_line(w, "Rejected", summary.rejected, color, Tone::Muted)?;
    count_line(w, "Duplicates", summary.duplicates, color, Tone::Muted)?;
    count_line(w, "Skipped", summary.skipped, color, Tone::Bad)?;

    let mut reasons: Vec<_> = summary.skip_reasons.iter().collect();
    reasons.sort_by_key(|(reason, _)| reason.as_str());
    for (reason, count) in reasons {
        writeln!(w, "    {}: {}", reason.as_str(), count)?;
    }
    if summary.recoveries > 0 {
        writeln!(w, "  Browser recovered {} time(s)", summary.recoveries)?;
    }
    if summary.failed_days > 0 {
        count_line(w, "Days without search form", summary.failed_days, color, Tone::Bad)?;
    }
    Ok(())
}

/// Print the totals of a `daily` job.
pub fn print_job_summary(
    w: &mut dyn Write,
    summary: &JobSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let header = if summary.date_start == summary.date_end {
        format!("Gazette of {}", summary.date_start.format("%d/%m/%Y"))
    } else {
        format!(
            "Gazettes {} to {}",
            summary.date_start.format("%d/%m/%Y"),
            summary.date_end.format("%d/%m/%Y")
        )
    };
    if color.enabled() {
        writeln!(w, "{}", header.bold())?;
    } else {
        writeln!(w, "{}", header)?;
    }
    count_line(w, "Stored", summary.extracted_count, color, Tone::Good)?;
    count_line(w, "Rejected", summary.rejected_count, color, Tone::Muted)?;
    count_line(w, "Duplicates", summary.duplicate_count, color, Tone::Muted)?;
    count_line(w, "Skipped", summary.skipped_count, color, Tone::Bad)?;
    Ok(())
}

/// Print what a dry run found in a local file.
pub fn print_parse_report(
    w: &mut dyn Write,
    fields: &ExtractedFields,
    decision: &ClassificationDecision,
    threshold: f64,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w, "Case number:       {}", fields.case_number)?;
    match fields.filing_date {
        Some(date) => writeln!(w, "Filing date:       {}", date.format("%d/%m/%Y"))?,
        None => writeln!(w, "Filing date:       -")?,
    }
    writeln!(w, "Claimants:         {}", names(&fields.claimant_names))?;
    writeln!(w, "Attorneys:         {}", names(&fields.attorney_names))?;
    writeln!(w, "Gross principal:   {}", amount(fields.gross_principal))?;
    writeln!(w, "Net principal:     {}", amount(fields.net_principal))?;
    writeln!(w, "Moratory interest: {}", amount(fields.moratory_interest))?;
    writeln!(w, "Attorney fees:     {}", amount(fields.attorney_fees))?;
    writeln!(w)?;

    let signals: Vec<&str> = decision.matched_signals.iter().map(|s| s.as_str()).collect();
    writeln!(
        w,
        "Signals:           {}",
        if signals.is_empty() {
            "-".to_string()
        } else {
            signals.join(", ")
        }
    )?;
    let verdict = format!(
        "{} (score {:.2}, threshold {:.2})",
        if decision.accepted { "ACCEPTED" } else { "REJECTED" },
        decision.score,
        threshold
    );
    if !color.enabled() {
        writeln!(w, "Verdict:           {}", verdict)?;
    } else if decision.accepted {
        writeln!(w, "Verdict:           {}", verdict.green().bold())?;
    } else {
        writeln!(w, "Verdict:           {}", verdict.yellow())?;
    }
    Ok(())
}

enum Tone {
    Good,
    Muted,
    Bad,
}

fn count_line(
    w: &mut dyn Write,
    label: &str,
    count: usize,
    color: ColorMode,
    tone: Tone,
) -> std::io::Result<()> {
    let value = count.to_string();
    if !color.enabled() || count == 0 {
        return writeln!(w, "  {}: {}", label, value);
    }
    match tone {
        Tone::Good => writeln!(w, "  {}: {}", label, value.green().bold()),
        Tone::Muted => writeln!(w, "  {}: {}", label, value.dimmed()),
        Tone::Bad => writeln!(w, "  {}: {}", label, value.red()),
    }
}

fn names(list: &Option<Vec<String>>) -> String {
    match list {
        Some(names) => names.join("; "),
        None => "-".to_string(),
    }
}

fn amount(value: Option<Decimal>) -> String {
    value
        .map(|v| format!("R$ {}", format_brl(v)))
        .unwrap_or_else(|| "-".to_string())
}
