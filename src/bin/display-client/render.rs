//! The paint surface. The runtime computes a [`Frame`] — everything visible
//! on screen this instant — and a [`Surface`] draws it. The shipped surface
//! is a terminal kiosk; the split keeps the frame math testable and the
//! output swappable.

use std::io::Write;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame {
    pub school_name: String,
    pub headline: String,
    pub state_label: String,
    pub countdown: String,
    /// 0.0..=1.0 through the running block.
    pub progress: Option<f64>,
    pub date_line: String,
    /// Compact day path: every block of today with its times.
    pub mini_schedule: Vec<String>,
    pub standby: Vec<String>,
    pub period_classes: Vec<String>,
    pub duty: Vec<String>,
    pub announcement: Option<String>,
    pub excellence: Option<String>,
    /// Scroll offsets in pixels for the two marquee panels.
    pub standby_offset: f64,
    pub periods_offset: f64,
    /// Transient problem banner (network down, retrying).
    pub banner: Option<String>,
    /// Terminal overlay: set once, polling has stopped.
    pub blocker: Option<String>,
    pub is_stale: bool,
}

pub trait Surface: Send {
    fn paint(&mut self, frame: &Frame);
}

/// Plain terminal kiosk output. Repaints only when the frame content
/// actually changed so an idle screen costs nothing.
pub struct TermSurface {
    last: Option<Frame>,
}

impl TermSurface {
    pub fn new() -> Self {
        Self { last: None }
    }

    fn render(frame: &Frame) -> String {
        let mut out = String::new();

        if let Some(blocker) = &frame.blocker {
            out.push_str("==================================================\n");
            out.push_str(&format!("  ⛔ {blocker}\n"));
            out.push_str("==================================================\n");
            return out;
        }

        out.push_str(&format!("┌─ {} ─ {}\n", frame.school_name, frame.date_line));
        if let Some(banner) = &frame.banner {
            out.push_str(&format!("│ ⚠ {banner}\n"));
        }
        out.push_str(&format!("│ {}\n", frame.headline));
        out.push_str(&format!("│ {}   ⏱ {}\n", frame.state_label, frame.countdown));
        if let Some(progress) = frame.progress {
            out.push_str(&format!("│ {}\n", progress_bar(progress)));
        }
        if !frame.mini_schedule.is_empty() {
            out.push_str(&format!("│ {}\n", frame.mini_schedule.join("  ")));
        }
        if !frame.period_classes.is_empty() {
            out.push_str("│ الحصص الجارية:\n");
            for line in &frame.period_classes {
                out.push_str(&format!("│   {line}\n"));
            }
        }
        if !frame.standby.is_empty() {
            out.push_str("│ الانتظار:\n");
            for line in &frame.standby {
                out.push_str(&format!("│   {line}\n"));
            }
        }
        if !frame.duty.is_empty() {
            out.push_str("│ الإشراف:\n");
            for line in &frame.duty {
                out.push_str(&format!("│   {line}\n"));
            }
        }
        if let Some(announcement) = &frame.announcement {
            out.push_str(&format!("│ 📢 {announcement}\n"));
        }
        if let Some(excellence) = &frame.excellence {
            out.push_str(&format!("│ ⭐ {excellence}\n"));
        }
        out.push_str("└─\n");
        out
    }
}

impl Surface for TermSurface {
    fn paint(&mut self, frame: &Frame) {
        if self.last.as_ref() == Some(frame) {
            return;
        }
        let rendered = Self::render(frame);
        let mut stdout = std::io::stdout().lock();
        // Clear and home; a kiosk terminal owns the whole screen.
        let _ = write!(stdout, "\x1b[2J\x1b[H{rendered}");
        let _ = stdout.flush();
        self.last = Some(frame.clone());
    }
}

fn progress_bar(progress: f64) -> String {
    const WIDTH: usize = 30;
    let filled = (progress.clamp(0.0, 1.0) * WIDTH as f64).round() as usize;
    let mut bar = String::with_capacity(WIDTH + 2);
    bar.push('[');
    for i in 0..WIDTH {
        bar.push(if i < filled { '█' } else { '·' });
    }
    bar.push(']');
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocker_replaces_everything_else() {
        let frame = Frame {
            blocker: Some("الشاشة مفعلة على جهاز آخر".into()),
            headline: "الحصة 1".into(),
            ..Frame::default()
        };
        let rendered = TermSurface::render(&frame);
        assert!(rendered.contains("⛔"));
        assert!(!rendered.contains("الحصة 1"));
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(0.0).matches('█').count(), 0);
        assert_eq!(progress_bar(0.5).matches('█').count(), 15);
        assert_eq!(progress_bar(1.0).matches('█').count(), 30);
    }

    #[test]
    fn sections_appear_only_when_populated() {
        let frame = Frame {
            school_name: "مدرسة".into(),
            headline: "الحصة 2".into(),
            standby: vec!["1 — أ/2".into()],
            ..Frame::default()
        };
        let rendered = TermSurface::render(&frame);
        assert!(rendered.contains("الانتظار"));
        assert!(!rendered.contains("الإشراف"));
        assert!(!rendered.contains("📢"));
    }
}
