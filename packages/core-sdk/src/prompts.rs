use crate::models::ChatMessage;

pub const NOTES_OPEN: &str = "<<<NOTAS>>>";
pub const NOTES_CLOSE: &str = "<<<FIN_NOTAS>>>";

/**
 * \brief 生成 [system, user] 两条消息；不校验语言代码，空内容同样合法。
 * \param content         文档全文
 * \param target_language 输出语言代码
 */
pub fn build_messages(content: &str, target_language: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(target_language)),
        ChatMessage::user(user_prompt(content)),
    ]
}

fn system_prompt(target_language: &str) -> String {
    format!(
        r#"
You are an expert assistant in personal knowledge organization.
You receive text fragments in conversation format (copied from a chat),
which may be jumbled, repetitive, or incomplete.

Your task is to:
1. Analyze the text as if they were unstructured personal notes.
2. Detect if the chat contains several different topics.
  - If there are multiple topics, divide the content into INDEPENDENT SECTIONS.
  - Give each section a clear title that represents the context.
3. Within each section:
  - Identify main ideas and sub-ideas.
  - Eliminate redundancies and noise.
  - Organize with hierarchies (headings, subheadings, bullets).
4. Generate the result in **clean Markdown**.
5. The final result must be written in the target language: {target_language}.
6. Never make up information, just reorganize and summarize.

IMPORTANT: Do not include reasoning traces, chain-of-thought, or <think> blocks in your output.
Only return the cleaned, final organized note in Markdown.
"#
    )
}

fn user_prompt(content: &str) -> String {
    format!(
        r#"
I have the following notes copied from a chat.
The content may mix several different topics in a single stream.
Please:
  - Divide the content into separate thematic sections if you detect multiple contexts.
  - Organize each section clearly and hierarchically.
  - Use Markdown.
{NOTES_OPEN}
{content}
{NOTES_CLOSE}
"#
    )
}
