use serde::Serialize;

use crate::error::VerificationError;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SurveyQuestion {
    pub question: &'static str,
    pub options: [&'static str; 4],
}

pub const SURVEY_QUESTIONS: [SurveyQuestion; 5] = [
    SurveyQuestion {
        question: "How did you hear about Sonavo?",
        options: ["Social Media", "Friend", "Search", "Other"],
    },
    SurveyQuestion {
        question: "What interests you most about Web3?",
        options: [
            "Earning Opportunities",
            "Technology",
            "Community",
            "Innovation",
        ],
    },
    SurveyQuestion {
        question: "How experienced are you with crypto?",
        options: ["Beginner", "Intermediate", "Advanced", "Expert"],
    },
    SurveyQuestion {
        question: "What type of tasks interest you most?",
        options: ["Social", "Technical", "Creative", "Educational"],
    },
    SurveyQuestion {
        question: "How much time can you dedicate weekly?",
        options: ["1-2 hours", "3-5 hours", "5-10 hours", "10+ hours"],
    },
];

/// One answer per question, in order, each picked from that question's options.
pub fn validate_answers(answers: &[String]) -> Result<(), VerificationError> {
    if answers.len() != SURVEY_QUESTIONS.len() {
        return Err(VerificationError::InvalidSurvey(format!(
            "expected {} answers, got {}",
            SURVEY_QUESTIONS.len(),
            answers.len()
        )));
    }
    for (idx, (answer, question)) in answers.iter().zip(SURVEY_QUESTIONS.iter()).enumerate() {
        if !question.options.contains(&answer.as_str()) {
            return Err(VerificationError::InvalidSurvey(format!(
                "answer {} to question {} is not an option",
                answer,
                idx + 1
            )));
        }
    }
    Ok(())
}
