use std::fmt;

use serde::Serialize;

/// Progress and timing counters of a render, handed to stats callbacks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderStats {
    pub scene_name: String,
    /// Current frame.
    pub cfra: i32,
    pub totpart: usize,
    pub partsdone: usize,
    /// Current field (1 or 2), 0 when not field rendering.
    pub curfield: u32,
    /// Current motion blur sample, 0 when not blurring.
    pub curblur: u32,
    /// Current full-sample index, 0 when not full-sampling.
    pub curfsa: u32,
    /// Seconds spent on the last frame.
    pub lastframetime: f64,
    /// Transient status line, e.g. the part being drawn.
    pub infostr: Option<String>,
}

impl RenderStats {
    /// Fraction of parts completed in the current pass.
    pub fn progress(&self) -> f32 {
        if self.totpart == 0 {
            0.0
        } else {
            self.partsdone as f32 / self.totpart as f32
        }
    }
}

impl fmt::Display for RenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fra:{}", self.cfra)?;
        if self.curfield > 0 {
            write!(f, " Field {}", self.curfield)?;
        }
        if self.curblur > 0 {
            write!(f, " Blur {}", self.curblur)?;
        }
        if self.curfsa > 0 {
            write!(f, " Sample {}", self.curfsa)?;
        }
        match &self.infostr {
            Some(info) => write!(f, " | {}", info),
            None => write!(f, " | Sce: {}", self.scene_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_line_with_field_and_blur() {
        let stats = RenderStats {
            scene_name: "Scene".into(),
            cfra: 12,
            curfield: 2,
            curblur: 3,
            ..Default::default()
        };
        assert_eq!(stats.to_string(), "Fra:12 Field 2 Blur 3 | Sce: Scene");
    }

    #[test]
    fn test_stats_line_prefers_infostr() {
        let stats = RenderStats {
            cfra: 1,
            infostr: Some("Scene, Part 3-16".into()),
            ..Default::default()
        };
        assert_eq!(stats.to_string(), "Fra:1 | Scene, Part 3-16");
    }

    #[test]
    fn test_progress_fraction() {
        let stats = RenderStats {
            totpart: 8,
            partsdone: 2,
            ..Default::default()
        };
        assert_eq!(stats.progress(), 0.25);
        assert_eq!(RenderStats::default().progress(), 0.0);
    }
}
