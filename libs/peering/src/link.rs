//! Tunnel link removal via netlink.

use anyhow::{Context as _, Result};
use futures::TryStreamExt;
use rtnetlink::Error::NetlinkError;

/// Removes the tunnel link so it can be recreated with a new address.
///
/// Best-effort and detached: the engine must not block on netlink while it
/// holds the cache lock. A missing link is not an error.
pub(crate) fn delete_link(iface: String) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!(%iface, "No runtime, skipping link removal");
        return;
    };

    handle.spawn(async move {
        if let Err(e) = try_delete_link(&iface).await {
            tracing::info!(%iface, "Failed to delete link: {e:#}");
        }
    });
}

async fn try_delete_link(iface: &str) -> Result<()> {
    let (connection, handle, _) =
        rtnetlink::new_connection().context("Failed to create netlink connection")?;
    let connection = tokio::spawn(connection);

    let result = async {
        let link = handle
            .link()
            .get()
            .match_name(iface.to_owned())
            .execute()
            .try_next()
            .await;

        let link = match link {
            Ok(Some(link)) => link,
            Ok(None) => return Ok(()),
            Err(NetlinkError(e))
                if e.raw_code() == -libc::ENODEV || e.raw_code() == -libc::ENOENT =>
            {
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to look up link"),
        };

        handle
            .link()
            .del(link.header.index)
            .execute()
            .await
            .context("Failed to delete link")?;

        tracing::debug!(%iface, "Deleted existing tunnel link");

        Ok(())
    }
    .await;

    connection.abort();

    result
}
