use mcpbox_mcp::Tool;

/// Build the system prompt for a chat turn.
///
/// Without tools the model gets a general assistant prompt. With tools it is
/// told what each tool accepts and to answer with `<tool_call>` blocks that
/// [`crate::tool_calls::parse_tool_calls`] can pick up.
pub fn build_system_prompt(tools: &[Tool]) -> String {
    if tools.is_empty() {
        return concat!(
            "You are a helpful AI assistant. You can help with:\n\n",
            "- General questions and conversations\n",
            "- Coding assistance and explanations\n",
            "- Problem-solving and brainstorming\n",
            "- Writing and editing help\n",
            "- Educational topics and explanations\n\n",
        )
        .to_string();
    }

    let mut prompt = String::from(
        "You are an AI assistant with access to external tools. Your primary job is to call \
         tools to answer user requests whenever possible.\n\n",
    );

    prompt.push_str("AVAILABLE TOOLS:\n");
    for tool in tools {
        let description = tool.description.as_deref().unwrap_or("No description");
        prompt.push_str(&format!("- {}: {description}\n", tool.name));
        prompt.push_str(&format!(
            "  inputSchema: {}\n",
            serde_json::to_string_pretty(&tool.input_schema).unwrap_or_default()
        ));
    }
    prompt.push('\n');

    prompt.push_str(concat!(
        "TOOL CALLING INSTRUCTIONS:\n",
        "- If the user asks for a specific action, data, or function that cannot be answered ",
        "conversationally, you MUST call the relevant tool using the exact format below.\n",
        "- DO NOT call a tool for greetings, small talk, or general conversation. ",
        "Respond naturally in those cases.\n",
        "- DO NOT use the echo tool for greetings, small talk, or to simply repeat what the user said.\n",
        "- Only respond conversationally if NO tool is relevant.\n",
        "- If the user asks about available tools, respond with a short list of tool names and ",
        "descriptions only. Do NOT include schemas or technical details in your answer.\n",
        "- Use this format for tool calls (no extra text):\n",
        "<tool_call>\n",
        "{\"name\": \"tool_name\", \"arguments\": { /* fill according to inputSchema */ }}\n",
        "</tool_call>\n",
        "- You may call multiple tools if needed, each in its own <tool_call> block.\n",
        "- Never include any explanation, jokes, or chit-chat when a tool call is required.\n",
        "\n",
    ));

    prompt
}
