use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label of one alternative of a multiple choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Choice {
    A,
    B,
    C,
    D,
    E,
}

impl Choice {
    pub const ALL: [Choice; 5] = [Choice::A, Choice::B, Choice::C, Choice::D, Choice::E];

    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::C => "C",
            Choice::D => "D",
            Choice::E => "E",
        }
    }

    /// Zero based position of the label (A = 0).
    pub fn position(&self) -> u8 {
        match self {
            Choice::A => 0,
            Choice::B => 1,
            Choice::C => 2,
            Choice::D => 3,
            Choice::E => 4,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChoiceError(String);

impl fmt::Display for ParseChoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid choice label '{}', expected one of A-E", self.0)
    }
}

impl std::error::Error for ParseChoiceError {}

impl FromStr for Choice {
    type Err = ParseChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Choice::A),
            "B" => Ok(Choice::B),
            "C" => Ok(Choice::C),
            "D" => Ok(Choice::D),
            "E" => Ok(Choice::E),
            _ => Err(ParseChoiceError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Choice {
    type Error = ParseChoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Choice> for String {
    fn from(choice: Choice) -> Self {
        choice.as_str().to_string()
    }
}

/// Row identifiers arrive as integers from Postgres tables and as strings
/// from document stores; both are carried as strings.
pub(crate) fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Ok(value),
        serde_json::Value::Number(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!("unsupported id value: {}", other))),
    }
}

/// A bar exam question as stored in the `questions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub year: i32,
    pub exam: String,
    pub number: i32,
    pub area: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub statement: String,
    pub alternative_a: String,
    pub alternative_b: String,
    pub alternative_c: String,
    pub alternative_d: String,
    #[serde(default)]
    pub alternative_e: Option<String>,
    pub correct_answer: Choice,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl Question {
    pub fn alternatives(&self) -> Vec<Alternative> {
        let mut alternatives = vec![
            Alternative::new(Choice::A, &self.alternative_a),
            Alternative::new(Choice::B, &self.alternative_b),
            Alternative::new(Choice::C, &self.alternative_c),
            Alternative::new(Choice::D, &self.alternative_d),
        ];
        if let Some(text) = self.alternative_e.as_deref().filter(|t| !t.trim().is_empty()) {
            alternatives.push(Alternative::new(Choice::E, text));
        }
        alternatives
    }

    pub fn choice_count(&self) -> u8 {
        if self
            .alternative_e
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
        {
            5
        } else {
            4
        }
    }

    pub fn offers(&self, choice: Choice) -> bool {
        choice.position() < self.choice_count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub label: Choice,
    pub text: String,
}

impl Alternative {
    fn new(label: Choice, text: &str) -> Self {
        Self {
            label,
            text: text.to_string(),
        }
    }
}

/// Question as shown while it is being answered: the answer key and the
/// explanation are withheld.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub year: i32,
    pub exam: String,
    pub number: i32,
    pub area: String,
    pub theme: Option<String>,
    pub subject: Option<String>,
    pub statement: String,
    pub alternatives: Vec<Alternative>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            year: question.year,
            exam: question.exam.clone(),
            number: question.number,
            area: question.area.clone(),
            theme: question.theme.clone(),
            subject: question.subject.clone(),
            statement: question.statement.clone(),
            alternatives: question.alternatives(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaSummary {
    pub area: String,
    pub question_count: u32,
}
