use crate::models::{Identity, NICK_SUFFIX};
use crate::state::ServiceContext;

pub fn get_identity(ctx: &ServiceContext) -> Result<Identity, String> {
    ctx.db
        .load_identity()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "identity not initialized".to_string())
}

/// Set the display name from the base the user typed; the suffix is always
/// appended. How often a user may rename themselves is the front end's
/// policy, not ours.
pub fn set_display_name(ctx: &ServiceContext, base: &str) -> Result<String, String> {
    let base = base.trim();
    if base.is_empty() {
        return Err("display name must not be empty".to_string());
    }
    let name = format!("{}{}", base, NICK_SUFFIX);
    ctx.db.set_display_name(&name).map_err(|e| e.to_string())?;
    Ok(name)
}
