use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, normalize_identifier, open_engine,
    resolve_message, Context,
};
use crate::error::CliError;

pub async fn run_edit(id: &str, content_parts: &[String], ctx: &Context) -> Result<(), CliError> {
    let normalized_id = normalize_identifier(id)?;
    let engine = open_engine(ctx).await?;
    let message = resolve_message(&engine, &normalized_id).await?;

    let edited_content = match normalize_content(&content_parts.join(" ")) {
        Some(content) => content,
        None => capture_editor_input_with_initial(&message.content)?
            .ok_or(CliError::EmptyEditedContent)?,
    };

    if edited_content == message.content {
        println!("{}", message.id);
        return Ok(());
    }

    let updated = engine.update_message(message.id, &edited_content).await?;
    println!("{}", updated.id);
    Ok(())
}
