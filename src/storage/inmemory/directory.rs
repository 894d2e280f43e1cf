//! In-memory user directory
//!
//! Users live alongside the OAuth records in [`MemoryOAuthStorage`]. Passwords are
//! checked against bcrypt hashes or stored plain text depending on `password_type`.

use super::oauth::{MemoryOAuthStorage, lock};
use crate::errors::StorageError;
use crate::oauth::types::User;
use crate::oauth::wechat::WECHAT_UNION_ID_PROPERTY;
use crate::storage::traits::*;
use async_trait::async_trait;

#[async_trait]
impl UserDirectory for MemoryOAuthStorage {
    async fn get_user_by_fields(&self, organization: &str, field: &str) -> Result<Option<User>> {
        if field.is_empty() {
            return Ok(None);
        }
        let users = lock(&self.users)?;
        Ok(users
            .values()
            .filter(|u| u.owner == organization)
            .find(|u| u.name == field || u.email == field || u.phone == field)
            .cloned())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let users = lock(&self.users)?;
        Ok(users.get(id).cloned())
    }

    async fn get_user_by_wechat_id(
        &self,
        organization: &str,
        wechat_id: &str,
    ) -> Result<Option<User>> {
        if wechat_id.is_empty() {
            return Ok(None);
        }
        let users = lock(&self.users)?;
        Ok(users
            .values()
            .filter(|u| u.owner == organization)
            .find(|u| {
                u.wechat == wechat_id
                    || u.properties.get(WECHAT_UNION_ID_PROPERTY).map(String::as_str)
                        == Some(wechat_id)
            })
            .cloned())
    }

    async fn check_password(&self, user: &User, password: &str) -> Result<bool> {
        match user.password_type.as_str() {
            "bcrypt" => bcrypt::verify(password, &user.password)
                .map_err(|e| StorageError::InvalidData(format!("bcrypt hash: {}", e))),
            "" | "plain" => Ok(!user.password.is_empty() && user.password == password),
            other => Err(StorageError::InvalidData(format!(
                "unsupported password type: {}",
                other
            ))),
        }
    }

    async fn check_ldap_password(&self, user: &User, password: &str) -> Result<bool> {
        let ldap_passwords = lock(&self.ldap_passwords)?;
        Ok(ldap_passwords
            .get(&user.get_id())
            .is_some_and(|stored| stored == password))
    }

    async fn extend_user_with_roles_and_permissions(&self, user: &mut User) -> Result<()> {
        let id = user.get_id();
        if let Some(roles) = lock(&self.user_roles)?.get(&id) {
            user.roles = roles.clone();
        }
        if let Some(permissions) = lock(&self.user_permissions)?.get(&id) {
            user.permissions = permissions.clone();
        }
        Ok(())
    }

    async fn add_user(&self, user: &User) -> Result<()> {
        let mut users = lock(&self.users)?;
        if users.contains_key(&user.get_id()) {
            return Err(StorageError::InvalidData(format!(
                "user already exists: {}",
                user.get_id()
            )));
        }
        users.insert(user.get_id(), user.clone());
        Ok(())
    }
}
