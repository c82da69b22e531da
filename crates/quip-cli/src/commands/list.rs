use crate::commands::common::{
    format_message_lines, message_to_list_item, open_engine, Context, MessageListItem,
};
use crate::error::CliError;

pub async fn run_list(limit: usize, as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx).await?;
    let mut messages = engine.list_with_status().await;
    messages.truncate(limit);

    if as_json {
        let json_items = messages
            .iter()
            .map(|(message, status)| message_to_list_item(message, *status))
            .collect::<Vec<MessageListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_message_lines(&messages) {
            println!("{line}");
        }
    }

    Ok(())
}
