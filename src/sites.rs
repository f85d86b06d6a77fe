// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Static and single-page site locations.

use crate::config::{SiteConfig, SiteKind};
use axum::Router;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("{kind:?} directory does not exist for {prefix}: {dir}")]
    MissingDir {
        kind: SiteKind,
        prefix: String,
        dir: PathBuf,
    },

    #[error("spa base file does not exist for {prefix}: {path}")]
    MissingBasePage { prefix: String, path: PathBuf },
}

/// Mount every configured location.
///
/// A location at `/` becomes the fallback service. SPA sub-paths and their
/// subtrees answer with the base page.
pub fn router(locations: &BTreeMap<String, SiteConfig>) -> Result<Router, SiteError> {
    let mut router = Router::new();

    for (pattern, site) in locations {
        let prefix = pattern.trim_end_matches('/');
        if !site.dir.is_dir() {
            return Err(SiteError::MissingDir {
                kind: site.kind,
                prefix: pattern.clone(),
                dir: site.dir.clone(),
            });
        }

        if site.kind == SiteKind::Spa {
            let base_page = site.dir.join(&site.basepage);
            if !base_page.is_file() {
                return Err(SiteError::MissingBasePage {
                    prefix: pattern.clone(),
                    path: base_page,
                });
            }

            for route in site.client_routes(pattern) {
                router = router
                    .route_service(&route, ServeFile::new(&base_page))
                    .route_service(&format!("{route}/*rest"), ServeFile::new(&base_page));
                info!(kind = ?site.kind, route = %route, file = %base_page.display(), "Serving client route");
            }
        }

        let files = ServeDir::new(&site.dir);
        router = if prefix.is_empty() {
            router.fallback_service(files)
        } else {
            router.nest_service(prefix, files)
        };
        info!(kind = ?site.kind, prefix = %pattern, dir = %site.dir.display(), "Serving location");
    }

    Ok(router)
}
