//! Prompt text for every agent.

use crate::models::{AgentOutput, NO_CONTENT_FOUND, NO_RELATIONS_FOUND, NO_TEXT_FOUND};
use std::fmt::Write;

/// Question the collaboration manager asks when verifying a weak OCR result.
pub const VERIFY_TEXT_QUESTION: &str =
    "Can you verify if there is any text in this image? If yes, what is it?";

/// Prefix of the focused re-extraction request sent to the OCR agent.
pub const FOCUSED_OCR_PREFIX: &str =
    "Please perform a detailed OCR analysis, focusing on any text that might help answer: ";

pub const OCR_QUERY: &str =
    "Extract all text from this image, maintaining the original structure and formatting:";

pub const RELATION_QUERY: &str = "Analyze all relationships present in this image:";

/// System instruction for text extraction.
pub fn ocr_system(question: Option<&str>) -> String {
    let mut prompt = format!(
        "Transcribe every piece of text visible in the image and keep its layout where you can. \
         Be careful with numbers, dates and tables. \
         If the image contains no text at all, reply with exactly {}. ",
        NO_TEXT_FOUND
    );
    if let Some(question) = question {
        let _ = write!(
            prompt,
            "Give priority to text that helps answer this question: {}",
            question
        );
    }
    prompt
}

/// System instruction for relation analysis.
pub fn relation_system(question: Option<&str>) -> String {
    let mut prompt = format!(
        "You analyze how the things in an image relate to each other.\n\
         1. Describe the relationships between the objects, people and regions you see\n\
         2. Cover spatial placement (above, below, beside, inside)\n\
         3. Cover interactions between people and objects\n\
         4. Cover functional or hierarchical links\n\
         5. Be concrete and specific\n\
         6. If nothing in the image relates to anything else, reply with exactly {}\n",
        NO_RELATIONS_FOUND
    );
    if let Some(question) = question {
        let _ = writeln!(
            prompt,
            "7. Concentrate on the relationships that matter for this question: {}",
            question
        );
    }
    prompt
}

/// System instruction for general understanding, seeded with any OCR text.
pub fn general_system(ocr_text: &str) -> String {
    format!(
        "You answer questions about images. \
         Text recognized in the image by a separate OCR pass (may be empty):\n\n\
         {}\n\n\
         Answer the question carefully and accurately. Show step-by-step reasoning for \
         any calculation and say so plainly when you are unsure. \
         If the image gives you nothing to answer with, reply with exactly {}.\n\n",
        ocr_text, NO_CONTENT_FOUND
    )
}

pub const ACCURACY_REFINER_SYSTEM: &str = r#"You refine the answers of earlier image-analysis agents so that they answer the question as well as possible. Weigh:
1. Factual accuracy
2. Relevance to the question
3. Whether all the information the question needs is present
4. Clarity
5. Agreement between the different analyses

Return one improved answer that keeps only what helps answer the question."#;

pub const VISUAL_SYNTHESIZER_SYSTEM: &str = r#"You refine the answers of earlier image-analysis agents with a focus on visual detail. Weigh:
1. Whether the visual description is accurate and complete
2. Spatial placement of objects
3. Visual attributes such as color, size and shape
4. Composition and layout of the scene
5. The surrounding environment

Return one improved answer that sharpens the visual picture and stays relevant to the question."#;

pub const GAP_FILLER_SYSTEM: &str = r#"You refine the answers of earlier image-analysis agents with a focus on context and meaning. Weigh:
1. What the scene is about as a whole
2. Implications of what is shown
3. Cultural and situational context
4. Information that is implied rather than visible
5. Whether the reasoning holds together

Return one improved answer that fills the gaps left by the earlier agents and stays relevant to the question."#;

pub const RETRIEVER_SYSTEM: &str = r#"You produce the final answer about an image from the work of several earlier agents. Weigh:
1. Accuracy of each input
2. Where the inputs agree and disagree
3. Whether the final answer is complete
4. Relevance to the original question
5. Clarity

Give one authoritative answer built from the most reliable parts of the inputs."#;

/// Render upstream outputs as numbered blocks, in their given order.
pub fn render_upstream(question: &str, previous: &[AgentOutput], closing: &str) -> String {
    let mut query = format!(
        "Question: {}\n\nPrevious agents provided the following outputs:\n\n",
        question
    );
    for (i, resp) in previous.iter().enumerate() {
        let _ = write!(
            query,
            "Agent {} output (confidence: {:.2}):\n{}\n\n",
            i + 1,
            resp.confidence,
            resp.result
        );
    }
    let _ = write!(query, "{} {}", closing, question);
    query
}
