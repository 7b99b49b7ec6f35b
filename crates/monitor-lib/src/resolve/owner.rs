use tracing::{info, warn};

use crate::cache::UserDirectory;
use crate::context::ScanContext;
use crate::error::GatewayError;
use crate::gateway::{Operation, Scope};
use crate::models::{EmailStatus, IssuedToken, OwnerFacts, User, UserDetail};

/// User record by provider id.
///
/// The site's users are listed once per scan. When the VO-scoped listing is
/// refused, the caller's own identity domain is looked up through an
/// unscoped token and that domain is listed instead. `None` when both
/// strategies fail or the id is unknown.
pub async fn resolve_owner(ctx: &ScanContext, user_id: &str) -> Option<User> {
    let cache = ctx.cache();
    ctx.metrics().record_cache_lookup("user", cache.users_loaded());
    let users = cache.users(|| load_directory(ctx)).await;
    users.get(user_id).cloned()
}

async fn load_directory(ctx: &ScanContext) -> UserDirectory {
    let listed = match ctx
        .fetch::<Vec<User>>(Operation::UserList { domain_id: None }, Scope::Vo)
        .await
    {
        Ok(users) => Ok(users),
        Err(e) => {
            info!(
                site = %ctx.site().name,
                forbidden = e.is_forbidden(),
                "User listing refused, listing the caller's identity domain instead"
            );
            list_identity_domain(ctx).await
        }
    };

    match listed {
        Ok(users) => users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        Err(e) => {
            warn!(site = %ctx.site().name, error = %e, "Unable to get user list");
            UserDirectory::new()
        }
    }
}

async fn list_identity_domain(ctx: &ScanContext) -> Result<Vec<User>, GatewayError> {
    let token: IssuedToken = ctx.fetch(Operation::TokenIssue, Scope::Unscoped).await?;
    let me: UserDetail = ctx
        .fetch(Operation::UserShow { id: token.user_id }, Scope::Vo)
        .await?;
    ctx.fetch(
        Operation::UserList {
            domain_id: Some(me.domain_id),
        },
        Scope::Unscoped,
    )
    .await
}

/// E-mail of a directory subject, looked up at most once per subject.
/// [`EmailStatus::Disabled`] when no directory is configured.
pub async fn resolve_email(ctx: &ScanContext, subject: &str) -> EmailStatus {
    let Some(directory) = ctx.directory() else {
        return EmailStatus::Disabled;
    };
    let emails = ctx.cache().emails();
    ctx.metrics()
        .record_cache_lookup("email", emails.contains(subject));

    emails
        .get_or_lookup(subject, || async move {
            match directory.find_email(subject).await {
                Ok(Some(address)) => EmailStatus::Found(address),
                Ok(None) => EmailStatus::NotFound {
                    subject: subject.to_string(),
                },
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Directory lookup failed");
                    EmailStatus::Unavailable
                }
            }
        })
        .await
}

/// Owner facts for a VM; the raw id stands in when the user is unknown
pub async fn owner_facts(ctx: &ScanContext, user_id: Option<&str>) -> Option<OwnerFacts> {
    let user_id = user_id.filter(|id| !id.is_empty())?;
    let display_name = resolve_owner(ctx, user_id)
        .await
        .map(|user| user.name)
        .filter(|name| !name.is_empty());
    let email = match &display_name {
        Some(name) => Some(resolve_email(ctx, name).await),
        None => None,
    };
    Some(OwnerFacts {
        user_id: user_id.to_string(),
        display_name,
        email,
    })
}
