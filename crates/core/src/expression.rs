//! Facial-expression scoring over per-emotion likelihoods.
//!
//! The vision vendor reports each emotion as a likelihood bucket; everything
//! here works on the numeric scores derived from those buckets.

use serde::{Deserialize, Serialize};

/// Scores below this mean no emotion is clearly expressed.
const NEUTRAL_CUTOFF: f32 = 0.3;
/// Minimum confidence before an expression is fed into joke generation.
pub const CONTEXT_MIN_CONFIDENCE: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Neutral,
    Joy,
    Sorrow,
    Anger,
    Surprise,
    NoFace,
    Error,
}

impl Expression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Joy => "joy",
            Expression::Sorrow => "sorrow",
            Expression::Anger => "anger",
            Expression::Surprise => "surprise",
            Expression::NoFace => "no_face",
            Expression::Error => "error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Expression::Neutral => "Looking calm and relaxed",
            Expression::Joy => "Showing happiness and delight",
            Expression::Sorrow => "Appearing sad or melancholy",
            Expression::Anger => "Showing signs of frustration or anger",
            Expression::Surprise => "Looking surprised or astonished",
            Expression::NoFace => "No face detected",
            Expression::Error => "Unable to analyze expression",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Expression::Neutral => "😐",
            Expression::Joy => "😊",
            Expression::Sorrow => "😢",
            Expression::Anger => "😠",
            Expression::Surprise => "😲",
            Expression::NoFace => "👤",
            Expression::Error => "❓",
        }
    }
}

/// Maps a vision likelihood bucket name to a score in [0, 1].
pub fn likelihood_to_score(likelihood: &str) -> f32 {
    match likelihood {
        "VERY_UNLIKELY" => 0.1,
        "UNLIKELY" => 0.3,
        "POSSIBLE" => 0.5,
        "LIKELY" => 0.7,
        "VERY_LIKELY" => 0.9,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionScores {
    pub joy: f32,
    pub sorrow: f32,
    pub anger: f32,
    pub surprise: f32,
}

impl EmotionScores {
    fn entries(&self) -> [(Expression, &'static str, f32); 4] {
        [
            (Expression::Joy, "joy", self.joy),
            (Expression::Sorrow, "sorrow", self.sorrow),
            (Expression::Anger, "anger", self.anger),
            (Expression::Surprise, "surprise", self.surprise),
        ]
    }

    /// The highest-scoring emotion, or neutral at 0.5 when nothing reaches
    /// the cutoff. Ties go to the earlier emotion.
    pub fn dominant(&self) -> (Expression, f32) {
        let (expression, _, score) = self
            .entries()
            .into_iter()
            .fold((Expression::Neutral, "", f32::MIN), |best, entry| {
                if entry.2 > best.2 { entry } else { best }
            });
        if score < NEUTRAL_CUTOFF {
            (Expression::Neutral, 0.5)
        } else {
            (expression, score)
        }
    }
}

/// Extra per-face detail reported alongside the dominant expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceMetadata {
    pub detection_confidence: f32,
    pub landmarking_confidence: f32,
    pub headwear_likelihood: f32,
    pub under_exposed_likelihood: f32,
    pub blurred_likelihood: f32,
    pub roll_angle: f32,
    pub pan_angle: f32,
    pub tilt_angle: f32,
    pub all_emotions: EmotionScores,
}

impl FaceMetadata {
    /// Short observations about head pose, image quality and mixed emotions,
    /// joined with " • ". Empty when nothing stands out.
    pub fn interesting_comment(&self) -> String {
        let mut comments = Vec::new();

        let roll = self.roll_angle.abs();
        let pan = self.pan_angle.abs();
        let tilt = self.tilt_angle.abs();
        if roll > 15.0 {
            comments.push(format!("tilting head {roll:.1}°"));
        }
        if pan > 20.0 {
            let direction = if self.pan_angle < 0.0 { "left" } else { "right" };
            comments.push(format!("looking {direction} ({pan:.1}°)"));
        }
        if tilt > 15.0 {
            let direction = if self.tilt_angle > 0.0 { "up" } else { "down" };
            comments.push(format!("looking {direction} ({tilt:.1}°)"));
        }

        if self.headwear_likelihood > 0.5 {
            comments.push("wearing headwear".to_string());
        }
        if self.blurred_likelihood > 0.5 {
            comments.push("image is blurry".to_string());
        }
        if self.under_exposed_likelihood > 0.5 {
            comments.push("lighting is dim".to_string());
        }

        if self.detection_confidence > 0.95 {
            comments.push("crystal clear face detection".to_string());
        } else if self.detection_confidence < 0.7 {
            comments.push("face detection is uncertain".to_string());
        }

        let emotions = &self.all_emotions;
        let high: Vec<&str> = emotions
            .entries()
            .iter()
            .filter(|(_, _, score)| *score > 0.4)
            .map(|(_, name, _)| *name)
            .collect();
        if high.len() > 1 {
            comments.push(format!("showing mixed emotions: {}", high.join(", ")));
        }
        if emotions.joy > 0.3 && emotions.sorrow > 0.3 {
            comments.push("bittersweet expression".to_string());
        }
        if emotions.joy > 0.4 && emotions.anger > 0.3 {
            comments.push("trying to smile through frustration".to_string());
        }

        comments.join(" • ")
    }
}

/// One analysed video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub success: bool,
    pub expression: Expression,
    pub confidence: f32,
    pub description: String,
    pub emoji: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FaceMetadata>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub comment: String,
}

impl ExpressionResult {
    pub fn from_face(metadata: FaceMetadata) -> Self {
        let (expression, confidence) = metadata.all_emotions.dominant();
        Self {
            success: true,
            expression,
            confidence,
            description: describe(expression, confidence),
            emoji: expression.emoji().to_string(),
            comment: metadata.interesting_comment(),
            metadata: Some(metadata),
        }
    }

    pub fn no_face() -> Self {
        Self::unsuccessful(Expression::NoFace)
    }

    pub fn failed() -> Self {
        Self::unsuccessful(Expression::Error)
    }

    fn unsuccessful(expression: Expression) -> Self {
        Self {
            success: false,
            expression,
            confidence: 0.0,
            description: describe(expression, 0.0),
            emoji: expression.emoji().to_string(),
            metadata: None,
            comment: String::new(),
        }
    }

    /// The sentence handed to joke generation, if this result is usable.
    pub fn joke_context(&self) -> Option<String> {
        (self.success && self.confidence > CONTEXT_MIN_CONFIDENCE)
            .then(|| format!("The person appears to be {}", self.description))
    }
}

/// A description with a confidence qualifier, e.g.
/// "Showing happiness and delight (very confident)".
pub fn describe(expression: Expression, confidence: f32) -> String {
    let level = if confidence > 0.8 {
        "very confident"
    } else if confidence > 0.6 {
        "confident"
    } else if confidence > 0.4 {
        "somewhat confident"
    } else {
        "uncertain"
    };
    format!("{} ({level})", expression.description())
}
