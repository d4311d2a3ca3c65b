//! Turns the `To`/`Cc` header of an outgoing message into deliverable
//! addresses.
//!
//! Entries with a domain are kept as they are. Bare names are looked up in the
//! [`Directory`] and replaced by the user's primary address. Users that do not
//! exist or have no primary address are dropped from the list rather than
//! failing the message.

use courier_common::{
    Directory, RecipientEntry, address, address::AddressError, error::DirectoryError, internal,
};

/// Why an entry did not make it into the resolved header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(AddressError),
    UnknownUser(String),
    NoPrimaryAddress(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Dropped(DropReason),
}

/// Format a resolved directory user as a header entry.
///
/// A display name containing a double quote is dropped instead of escaped, so
/// only the bare address remains.
#[must_use]
pub fn generate_address(display_name: &str, addr_spec: &str) -> String {
    if display_name.contains('"') {
        addr_spec.to_string()
    } else {
        format!("\"{display_name}\" <{addr_spec}>")
    }
}

/// Resolve a single parsed entry.
///
/// # Errors
///
/// Directory failures other than an unknown name are returned as is.
pub async fn resolve_entry(
    directory: &dyn Directory,
    entry: &RecipientEntry,
) -> Result<Resolution, DirectoryError> {
    let (display_name, name) = match entry {
        RecipientEntry::Literal { .. } => return Ok(Resolution::Resolved(entry.to_string())),
        RecipientEntry::Directory { display_name, name } => (display_name, name),
    };

    let user = match directory.fetch(name).await {
        Ok(user) => user,
        Err(error) if error.is_invalid_name() => {
            internal!(level = WARN, %entry, %error, "Failed to resolve address");
            return Ok(Resolution::Dropped(DropReason::UnknownUser(name.clone())));
        }
        Err(error) => return Err(error),
    };

    let Some(email) = user.primary_email() else {
        internal!(level = DEBUG, user = %user.name, "User has no selected primary email address");
        return Ok(Resolution::Dropped(DropReason::NoPrimaryAddress(user.name)));
    };

    let display_name = display_name.as_deref().unwrap_or(&user.fullname);
    Ok(Resolution::Resolved(generate_address(display_name, email)))
}

/// Resolve every entry of a header value and join the survivors with `", "`.
///
/// An absent header, or one where every entry was dropped, resolves to the
/// empty string.
///
/// # Errors
///
/// Returns the first directory failure that is not about an unknown name.
pub async fn resolve_addresses(
    directory: &dyn Directory,
    header: Option<&str>,
) -> Result<String, DirectoryError> {
    let Some(header) = header else {
        return Ok(String::new());
    };

    let mut resolved = Vec::new();
    for entry in address::entries(header) {
        let resolution = match entry {
            Ok(entry) => resolve_entry(directory, &entry).await?,
            Err(error) => {
                internal!(level = WARN, %error, "Skipping malformed address");
                Resolution::Dropped(DropReason::Malformed(error))
            }
        };

        if let Resolution::Resolved(address) = resolution {
            resolved.push(address);
        }
    }

    Ok(resolved.join(", "))
}
