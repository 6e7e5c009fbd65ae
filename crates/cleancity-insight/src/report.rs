//! Report rendering for a logged event.
//!
//! Rendering is pure: the same event, estimate and hotspot always produce the
//! same text. Dates come from the event timestamp.

use serde::{Deserialize, Serialize};

use cleancity_core::estimator::Estimate;
use cleancity_core::types::{item_breakdown, Event, Hotspot, ReportFormat, Severity};

const RULE: &str = "============================================================";

/// A rendered report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub format: ReportFormat,
    pub event_id: i64,
    pub body: String,
    /// Whether the body was rewritten by a report-enhancement provider.
    #[serde(default)]
    pub enhanced: bool,
}

/// Renders events into email, markdown or plain-text reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportFormatter;

impl ReportFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(
        &self,
        format: ReportFormat,
        event: &Event,
        estimate: &Estimate,
        hotspot: Option<&Hotspot>,
    ) -> Report {
        let body = match format {
            ReportFormat::Email => render_email(event, estimate, hotspot),
            ReportFormat::Markdown => render_markdown(event, estimate, hotspot),
            ReportFormat::Plain => render_plain(event, estimate, hotspot),
        };
        Report {
            format,
            event_id: event.id,
            body,
            enhanced: false,
        }
    }

    /// Prompt handed to a report-enhancement provider.
    pub fn enhancement_prompt(&self, event: &Event, estimate: &Estimate) -> String {
        let breakdown = item_breakdown(&event.detections);
        let categories = if breakdown.is_empty() {
            "not itemized".to_string()
        } else {
            breakdown
                .keys()
                .map(|k| title_case(k))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut context = format!(
            "Litter detection event:\n\
             - Location: {}\n\
             - Items detected: {}\n\
             - Severity: {}\n\
             - Categories: {}\n\
             - Recommended volunteers: {}\n\
             - Estimated cleanup time: {} minutes\n",
            event.location,
            event.item_count,
            event.severity,
            categories,
            estimate.volunteers,
            estimate.minutes,
        );
        if let Some(ref notes) = event.notes {
            context.push_str(&format!("- Context: {}\n", notes));
        }

        format!(
            "Based on this litter detection data, write a professional report suitable \
             for city authorities:\n\n{}\n\
             Describe the situation factually, note the environmental and community \
             impact, and give specific cleanup recommendations. Format it as an email \
             to city services.",
            context
        )
    }
}

fn urgency_label(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "URGENT - Immediate attention required",
        Severity::Medium => "Moderate priority - Action needed within 1-3 days",
        Severity::Low => "Low priority - Routine cleanup recommended",
    }
}

fn title_case(label: &str) -> String {
    label
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn hotspot_line(hotspot: &Hotspot) -> String {
    format!(
        "This location has been reported {} times in the last {} days (trend: {}).",
        hotspot.event_count,
        hotspot.window_days,
        hotspot.trend.as_str()
    )
}

fn render_email(event: &Event, estimate: &Estimate, hotspot: Option<&Hotspot>) -> String {
    let date = event.timestamp.format("%B %d, %Y");
    let mut out = format!(
        "Subject: Litter Cleanup Request - {loc}\n\n\
         Dear City Services / Environmental Department,\n\n\
         I am writing to report litter accumulation that requires attention at the following location:\n\n\
         Location: {loc}\n\
         Date Reported: {date}\n\
         Severity Level: {sev} ({urgency})\n\n\
         Details of Litter Observed:\n\
         Total items detected: {count}\n",
        loc = event.location,
        date = date,
        sev = event.severity.as_str().to_uppercase(),
        urgency = urgency_label(event.severity),
        count = event.item_count,
    );
    for (label, count) in item_breakdown(&event.detections) {
        out.push_str(&format!("  - {}: {} item(s)\n", title_case(&label), count));
    }

    if let Some(ref notes) = event.notes {
        out.push_str(&format!("\nAdditional Context:\n{}\n", notes));
    }
    if let Some(hotspot) = hotspot {
        out.push_str(&format!("\n{}\n", hotspot_line(hotspot)));
    }

    out.push_str(&format!(
        "\nRecommended Action:\n\
         - Estimated cleanup time: {} minutes\n\
         - Volunteers needed: {}\n\
         - Estimated cost: ${:.2}\n\
         - Equipment required: {}\n\
         - Urgency: Action within {} day(s)\n",
        estimate.minutes,
        estimate.volunteers,
        estimate.cost,
        estimate.equipment.join(", "),
        estimate.urgency_days,
    ));

    out.push_str(
        "\nThis accumulation poses environmental and health concerns for the community. \
         I would appreciate a timely response regarding cleanup scheduling.\n\n\
         Thank you for your attention to this matter.\n\n\
         Best regards,\n\
         [Your Name / Community Group]\n\
         [Contact Information]\n",
    );
    out
}

fn render_markdown(event: &Event, estimate: &Estimate, hotspot: Option<&Hotspot>) -> String {
    let breakdown = item_breakdown(&event.detections);
    let mut out = format!(
        "# Litter Detection Report\n\n\
         ## Event Information\n\
         - **Event ID:** {}\n\
         - **Timestamp:** {}\n\
         - **Location:** {}\n\
         - **Severity:** {}\n\n\
         ## Detection Summary\n\
         - **Total Items:** {}\n\
         - **Unique Categories:** {}\n",
        event.id,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        event.location,
        event.severity.as_str().to_uppercase(),
        event.item_count,
        breakdown.len(),
    );

    if !breakdown.is_empty() {
        out.push_str("\n### Items Breakdown\n");
        let mut sorted: Vec<(&String, &u32)> = breakdown.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (label, count) in sorted {
            out.push_str(&format!("- **{}:** {} item(s)\n", title_case(label), count));
        }
    }

    out.push_str(&format!(
        "\n## Cleanup Plan\n\
         - **Recommended Volunteers:** {}\n\
         - **Estimated Time:** {} minutes\n\
         - **Estimated Cost:** ${:.2}\n\
         - **Urgency:** Within {} day(s)\n\
         - **Equipment Needed:**\n",
        estimate.volunteers, estimate.minutes, estimate.cost, estimate.urgency_days,
    ));
    for item in &estimate.equipment {
        out.push_str(&format!("  - {}\n", item));
    }
    out.push_str(&format!(
        "\n### Environmental Impact\n{}\n",
        estimate.environmental_impact
    ));

    if let Some(hotspot) = hotspot {
        out.push_str(&format!("\n## Hotspot\n{}\n", hotspot_line(hotspot)));
    }
    if let Some(ref notes) = event.notes {
        out.push_str(&format!("\n## Additional Notes\n{}\n", notes));
    }
    out.push_str("\n---\n*Generated by CleanCity*");
    out
}

fn render_plain(event: &Event, estimate: &Estimate, hotspot: Option<&Hotspot>) -> String {
    let mut lines = vec![
        RULE.to_string(),
        "LITTER DETECTION REPORT".to_string(),
        RULE.to_string(),
        String::new(),
        format!("Event ID: {}", event.id),
        format!("Date: {}", event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Location: {}", event.location),
        format!("Severity: {}", event.severity.as_str().to_uppercase()),
        String::new(),
        format!("Total Items Detected: {}", event.item_count),
    ];

    let breakdown = item_breakdown(&event.detections);
    if !breakdown.is_empty() {
        lines.push(String::new());
        lines.push("Items by Category:".to_string());
        for (label, count) in &breakdown {
            lines.push(format!("  - {}: {}", title_case(label), count));
        }
    }

    lines.extend([
        String::new(),
        "Cleanup Recommendations:".to_string(),
        format!("  - Volunteers needed: {}", estimate.volunteers),
        format!("  - Estimated time: {} minutes", estimate.minutes),
        format!("  - Estimated cost: ${:.2}", estimate.cost),
        format!("  - Action within: {} day(s)", estimate.urgency_days),
        format!("  - Equipment: {}", estimate.equipment.join(", ")),
    ]);

    if let Some(hotspot) = hotspot {
        lines.push(String::new());
        lines.push(hotspot_line(hotspot));
    }
    if let Some(ref notes) = event.notes {
        lines.push(String::new());
        lines.push("Notes:".to_string());
        lines.push(notes.clone());
    }
    lines.push(String::new());
    lines.push(RULE.to_string());
    lines.join("\n")
}
