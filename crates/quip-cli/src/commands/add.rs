use crate::commands::common::{open_engine, resolve_message_content, Context};
use crate::error::CliError;

pub async fn run_add(content_parts: &[String], ctx: &Context) -> Result<(), CliError> {
    let content = resolve_message_content(content_parts)?;

    let engine = open_engine(ctx).await?;
    let message = engine.create_message(&content).await?;

    println!("{}", message.id);
    Ok(())
}
