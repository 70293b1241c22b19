use crate::models::{AnomalyEvent, SignalPoint};

/// Renders anomalies as plain text for the operator console.
pub struct ContextView;

impl ContextView {
    /// Multi-line description of the anomaly bound to the session.
    pub fn describe(event: Option<&AnomalyEvent>) -> String {
        let Some(event) = event else {
            return "No anomaly bound. Select one with `diagnose <n>` or `inspect <n> <signal>`."
                .to_string();
        };

        let mut out = String::with_capacity(256);
        out.push_str(&format!("Active anomaly: {} ({})\n", event.severity, event.identity()));
        out.push_str(&format!("  Time:    {}\n", Self::time(event)));
        if !event.message.is_empty() {
            out.push_str(&format!("  Message: {}\n", event.message));
        }
        out.push_str(&format!("  Signals: {}\n", Self::signals(event)));
        if let Some(value) = event.value {
            out.push_str(&format!("  Value:   {:.2}\n", value));
        }
        out
    }

    /// One line per event for the event log listing.
    pub fn event_row(index: usize, event: &AnomalyEvent) -> String {
        format!(
            "[{:>3}] {}  {:<8}  {}  ({})",
            index,
            Self::time(event),
            event.severity.to_string(),
            event.message,
            Self::signals(event)
        )
    }

    /// One line per stream point; anomalous points are starred.
    pub fn point_row(index: usize, point: &SignalPoint) -> String {
        let marker = if point.is_anomalous() { '*' } else { ' ' };
        let flagged = point
            .anomalies
            .as_ref()
            .map(|a| {
                a.iter()
                    .map(|(signal, d)| format!("{} {:.1}σ", signal, d.deviation_sigma))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        format!(
            "[{:>4}]{} t={:.0}  V={:.2}  T={:.1}  P={:.1}  {}",
            index, marker, point.timestamp, point.vibration, point.temperature, point.power, flagged
        )
        .trim_end()
        .to_string()
    }

    fn time(event: &AnomalyEvent) -> String {
        event
            .occurred_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| format!("{}", event.timestamp))
    }

    fn signals(event: &AnomalyEvent) -> String {
        let d = &event.details;
        let fmt = |v: Option<f64>, digits: usize| match v {
            Some(v) => format!("{:.*}", digits, v),
            None => "-".to_string(),
        };
        format!(
            "V: {} | T: {} | P: {}",
            fmt(d.vibration, 2),
            fmt(d.temperature, 1),
            fmt(d.power, 1)
        )
    }
}
