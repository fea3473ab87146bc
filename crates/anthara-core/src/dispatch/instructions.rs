use crate::constants::markers;
use crate::dispatch::intent::{Intent, IntentMode};

/// Which flavor of answer the system instruction asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStyle {
    Standard,
    DeepResearch,
    Elaboration,
}

/// Builds the system instruction for a streamed answer.
pub struct InstructionBuilder {
    style: AnswerStyle,
    mode: Option<IntentMode>,
    language_hint: Option<String>,
    domain_hint: Option<String>,
    today: String,
}

impl InstructionBuilder {
    pub fn new(style: AnswerStyle) -> Self {
        Self {
            style,
            mode: None,
            language_hint: None,
            domain_hint: None,
            today: chrono::Local::now().format("%B %-d, %Y").to_string(),
        }
    }

    pub fn with_intent(mut self, intent: &Intent) -> Self {
        self.mode = Some(intent.mode);
        self.language_hint = intent.language_hint.clone();
        self.domain_hint = intent.domain_hint.clone();
        self
    }

    pub fn with_date(mut self, today: impl Into<String>) -> Self {
        self.today = today.into();
        self
    }

    pub fn build(&self) -> String {
        let mut prompt = String::with_capacity(2048);

        prompt.push_str(CORE_IDENTITY);
        prompt.push_str(&format!("\nToday's date is {}.", self.today));

        match self.style {
            AnswerStyle::Standard => {
                match self.mode {
                    Some(IntentMode::Conversation) => prompt.push_str(CONVERSATION_GUIDELINES),
                    Some(IntentMode::Explanation) => prompt.push_str(EXPLANATION_GUIDELINES),
                    _ => prompt.push_str(SEARCH_GUIDELINES),
                }
            }
            AnswerStyle::DeepResearch => prompt.push_str(DEEP_RESEARCH_GUIDELINES),
            AnswerStyle::Elaboration => prompt.push_str(ELABORATION_GUIDELINES),
        }

        if let Some(ref domain) = self.domain_hint {
            prompt.push_str(&format!(
                "\n\nThe question concerns {domain}; prefer authoritative sources in that field."
            ));
        }
        if let Some(ref language) = self.language_hint {
            prompt.push_str(&format!(
                "\n\nWrite the answer in the user's language (ISO code: {language})."
            ));
        }

        prompt.push_str(&citation_rules());
        prompt.push_str(&related_rules());

        prompt
    }
}

fn citation_rules() -> String {
    format!(
        "\n\n## Citations\n\
         Right after each sentence that relies on a web result, write the token {s}. \
         Use one {s} per supporting result, in the order the results were used. \
         Never write URLs or numbered references yourself.",
        s = markers::CITATION_SENTINEL
    )
}

fn related_rules() -> String {
    format!(
        "\n\n## Related questions\n\
         End every answer with three short follow-up questions the user might ask next, \
         one per line, wrapped exactly like this:\n\
         {begin}\n- first question\n- second question\n- third question\n{end}",
        begin = markers::RELATED_BEGIN,
        end = markers::RELATED_END
    )
}

const CORE_IDENTITY: &str = "\
You are Anthara, an answer engine. You answer questions directly and accurately, \
grounding claims in current web results and citing them.

## Style
- Lead with the answer, then supporting detail.
- Use short paragraphs and markdown lists where they help.
- If results disagree, say so and explain which is more credible.
- If you do not know, say so instead of guessing.";

const SEARCH_GUIDELINES: &str = "\n\n## Task
Search the web for the user's question and answer concisely from what you find.";

const CONVERSATION_GUIDELINES: &str = "\n\n## Task
The user is chatting. Reply naturally and briefly; only search when a fact needs checking.";

const EXPLANATION_GUIDELINES: &str = "\n\n## Task
Explain the topic step by step for a curious non-expert. Use an example or analogy, \
and search to confirm any facts or figures you give.";

const DEEP_RESEARCH_GUIDELINES: &str = "\n\n## Task: deep research
Investigate the question thoroughly. Search from several angles, compare sources, \
and produce a structured report with headings: an overview, key findings, points of \
disagreement, and a short conclusion. Favor primary and recent sources.";

const ELABORATION_GUIDELINES: &str = "\n\n## Task: elaborate
The user wants a more detailed answer to their last question than the one already given. \
Go deeper: add background, mechanisms, concrete examples and caveats. Search again for \
supporting detail rather than repeating the earlier answer.";
