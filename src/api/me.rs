//! Signed-in user profile (/v1/users/profile)

use anyhow::Result;

use crate::auth::Session;

/// Fetch and display the current user's profile.
pub async fn whoami(session: &Session) -> Result<()> {
    let me = session.profile().await?;

    println!();
    println!("Name:     {}", me.display_name());
    println!("Username: {}", me.username);
    println!("Email:    {}", me.email);
    println!(
        "Avatar:   {}",
        me.avatar.as_deref().unwrap_or("(none)")
    );
    println!(
        "Roles:    {}",
        if me.roles.is_empty() {
            "(none)".to_string()
        } else {
            me.roles.join(", ")
        }
    );
    println!("ID:       {}", me.user_id);

    Ok(())
}
