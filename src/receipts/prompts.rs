use super::extract::ExtractionMode;

pub const SYSTEM_PROMPT: &str = r#"You are a professional expert in receipt recognition and analysis.
Your task is to extract the following information from a receipt:
1. Total amount including taxes
2. Currency as an ISO 4217 code
3. Date and time of the receipt
4. Simple list of purchased items (just names, no details)

Return the information strictly in the following JSON format:
{
  "total_amount": number,
  "currency": "string",
  "date": "YYYY-MM-DD",
  "time": "HH:MM",
  "items": ["item name", "item name"]
}

If any information is missing, set the value to null.
Return only the raw JSON without explanations or markdown code fences.
Be precise and accurate in extracting the information."#;

pub const USER_PROMPT: &str =
    "Analyze this receipt and extract all required information in the structured format.";

pub const BATCH_PROMPT: &str = "All of the following images are pages of ONE multi-page receipt \
(like an airline ticket or a long invoice). Return a single consolidated result: the final total \
of the whole document, and the items from every page in page order.";

/// User instruction for the chosen extraction mode.
pub fn user_prompt(mode: ExtractionMode) -> String {
    match mode {
        ExtractionMode::Single => USER_PROMPT.to_string(),
        ExtractionMode::Batch => format!("{} {}", USER_PROMPT, BATCH_PROMPT),
    }
}
