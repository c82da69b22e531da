use crate::commands::common::{normalize_identifier, open_engine, resolve_message, Context};
use crate::error::CliError;

pub async fn run_delete(id: &str, ctx: &Context) -> Result<(), CliError> {
    let normalized_id = normalize_identifier(id)?;
    let engine = open_engine(ctx).await?;
    let message = resolve_message(&engine, &normalized_id).await?;

    engine.delete_message(message.id).await?;
    println!("{}", message.id);
    Ok(())
}
