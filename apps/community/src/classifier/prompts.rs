// Moderation prompt for the safety classifier.
// The model must answer with one JSON object; the client still tolerates
// prose around it and extracts the first balanced object.

pub const MODERATION_SYSTEM: &str = "You are a content moderation assistant for a \
    mental health support community for students. \
    You MUST respond with one valid JSON object only. \
    Do NOT include explanations outside the JSON object.";

pub const MODERATION_PROMPT_TEMPLATE: &str = r#"Analyze the following content and categorize it.

Categories:
1. "safe" - Normal content, no concerns
2. "mild_negative" - Mild negative emotions, sadness, stress, frustration (but not dangerous)
3. "severe_distress" - Severe emotional distress, hopelessness, but no explicit self-harm
4. "depression" - Clear signs of depression, persistent sadness, loss of interest
5. "self_harm" - Mentions of self-harm, cutting, hurting oneself
6. "suicide" - Suicidal ideation, thoughts of ending life, wanting to die
7. "aggressive" - Violent intentions, threats, bullying, hate speech, harmful to others

Response format:
{
  "category": "one of the categories above",
  "confidence": 0.0 to 1.0,
  "reasoning": "brief explanation",
  "keywords_detected": ["list", "of", "concerning", "words"]
}

Content to analyze:
"""
{content}
"""

Remember: only output the JSON object, nothing else."#;

pub fn moderation_prompt(content: &str) -> String {
    MODERATION_PROMPT_TEMPLATE.replace("{content}", content)
}
