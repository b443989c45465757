//! Customer accounts: registration, login, token refresh, profile, addresses
//! and account deletion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::customer::{username_base, username_candidates, MAX_ADDRESSES, LISTED_ADDRESSES};
use crate::domain::aggregates::security::failure_reason;
use crate::domain::aggregates::{Address, AddressFields, Customer, DeviceInfo, DeviceInfoInput, LoginMethod, Tier};
use crate::domain::events::{AccountEvent, DomainEvent};
use crate::domain::value_objects::Email;
use crate::services::auth::{hash_password, verify_password};
use crate::services::{
    validate, Claims, ClientInfo, EventPublisher, LoginSecurity, Mailer, RateLimiter, SessionService, TokenService,
    TokenType,
};
use crate::store::Store;
use crate::{Result, ShopError};

const ADDRESS_EDITS_PER_MINUTE: usize = 2;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub last_name: String,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub phone_number: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 8, max = 128, message = "Password must be at least 8 characters"))]
    pub new_password: String,
    pub new_password_confirm: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub verification_code: Option<String>,
    #[serde(default)]
    pub device_info: Option<DeviceInfoInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginSecurityInfo {
    pub tier: Tier,
    pub message: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user_id: i64,
    pub security: LoginSecurityInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    #[validate(length(max = 20))]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressView {
    #[serde(flatten)]
    pub address: Address,
    pub full_address: String,
}

impl From<Address> for AddressView {
    fn from(address: Address) -> Self {
        let full_address = address.full_address();
        Self { address, full_address }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
    pub user: String,
    pub deleted_at: DateTime<Utc>,
    pub addresses_deleted: usize,
    pub login_history_anonymized: u64,
    pub sessions_revoked: u64,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    tokens: TokenService,
    security: LoginSecurity,
    sessions: SessionService,
    mailer: Mailer,
    events: EventPublisher,
    address_edits: RateLimiter,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenService,
        security: LoginSecurity,
        sessions: SessionService,
        mailer: Mailer,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            tokens,
            security,
            sessions,
            mailer,
            events,
            address_edits: RateLimiter::per_minute(ADDRESS_EDITS_PER_MINUTE),
        }
    }

    pub async fn register(&self, input: RegisterInput) -> Result<Customer> {
        validate(&input)?;
        let email = Email::new(&input.email).map_err(|e| ShopError::Validation(e.to_string()))?;
        if self.store.customer_by_email(email.as_str()).await?.is_some() {
            return Err(ShopError::Conflict("A customer with this email already exists".to_string()));
        }

        let base = username_base(&email);
        let mut username = base.clone();
        for candidate in username_candidates(&base) {
            if !self.store.username_taken(&candidate).await? {
                username = candidate;
                break;
            }
        }

        let now = Utc::now();
        let customer = Customer {
            id: 0,
            email: email.as_str().to_string(),
            username,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            phone_number: input.phone_number.trim().to_string(),
            password_hash: hash_password(&input.password).await?,
            is_active: true,
            is_staff: false,
            is_email_verified: false,
            email_verification_token: Uuid::new_v4(),
            password_reset_token: None,
            password_reset_sent_at: None,
            token_version: 0,
            login_method: LoginMethod::Email,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        let customer = self.store.insert_customer(customer).await?;
        tracing::info!(customer = customer.id, email = %customer.email, "customer registered");

        self.mailer.send_email_verification(&customer).await;
        self.events
            .publish(DomainEvent::Account(AccountEvent::Registered { customer_id: customer.id, email: customer.email.clone() }))
            .await;
        Ok(customer)
    }

    pub async fn verify_email(&self, token: Uuid) -> Result<Customer> {
        let mut customer = self
            .store
            .customer_by_verification_token(token)
            .await?
            .ok_or_else(|| ShopError::Validation("Invalid verification link".to_string()))?;
        if customer.mark_email_verified() {
            self.store.update_customer(&customer).await?;
            tracing::info!(customer = customer.id, "email verified");
            self.events.publish(DomainEvent::Account(AccountEvent::EmailVerified { customer_id: customer.id })).await;
        }
        Ok(customer)
    }

    /// Mails a reset link if the email has an account. Unknown emails get no error.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = Email::new(email).map_err(|e| ShopError::Validation(e.to_string()))?;
        let Some(mut customer) = self.store.customer_by_email(email.as_str()).await? else {
            tracing::info!(email = %email.as_str(), "password reset requested for unknown email");
            return Ok(());
        };
        let token = customer.start_password_reset(Utc::now());
        self.store.update_customer(&customer).await?;
        tracing::info!(customer = customer.id, "password reset requested");
        self.mailer.send_password_reset(&customer, token).await;
        Ok(())
    }

    /// Sets a new password from a reset link and signs the customer out everywhere.
    pub async fn reset_password(&self, token: Uuid, input: PasswordResetConfirm) -> Result<u64> {
        let mut customer = self
            .store
            .customer_by_reset_token(token)
            .await?
            .ok_or_else(|| ShopError::Validation("Invalid password reset link.".to_string()))?;
        if customer.password_reset_expired(Utc::now()) {
            customer.clear_password_reset();
            self.store.update_customer(&customer).await?;
            return Err(ShopError::Validation("Password reset link has expired.".to_string()));
        }
        validate(&input)?;
        if input.new_password != input.new_password_confirm {
            return Err(ShopError::Validation("The two password fields didn't match.".to_string()));
        }

        customer.password_hash = hash_password(&input.new_password).await?;
        customer.clear_password_reset();
        let sessions_revoked = self.sessions.invalidate_all_tokens(&customer).await?;
        tracing::warn!(customer = customer.id, sessions_revoked, "password reset");
        self.events.publish(DomainEvent::Account(AccountEvent::PasswordReset { customer_id: customer.id })).await;
        Ok(sessions_revoked)
    }

    /// Drops idle keys from the address edit throttle.
    pub async fn purge_limits(&self) { self.address_edits.purge().await; }

    /// The full progressive login flow.
    pub async fn login(&self, input: LoginInput, client: &ClientInfo) -> Result<LoginResponse> {
        let email = input.email.trim().to_lowercase();

        let pre = self.security.check(&email, &client.ip).await?;
        if !pre.allowed {
            self.security.record_attempt(&email, client, false, &pre.message, pre.tier).await?;
            tracing::warn!(email, ip = %client.ip, "login refused: {}", pre.message);
            return Err(ShopError::Unauthorized(pre.message));
        }

        if pre.requires_verification {
            match input.verification_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                None => {
                    self.security.issue_code(&email, &client.ip).await?;
                    self.security.record_attempt(&email, client, false, failure_reason::VERIFICATION_REQUIRED, pre.tier).await?;
                    return Err(ShopError::VerificationRequired(
                        "Verification code sent to your email. Please enter it to continue.".to_string(),
                    ));
                }
                Some(code) => {
                    let (verified, message) = self.security.verify_code(&email, code).await?;
                    if !verified {
                        self.security.record_attempt(&email, client, false, failure_reason::VERIFICATION_REQUIRED, pre.tier).await?;
                        return Err(ShopError::VerificationRequired(message));
                    }
                }
            }
        }

        let Some(mut customer) = self.authenticate(&email, &input.password).await? else {
            let failed = self.security.handle_failed_login(&email, client, failure_reason::INVALID_CREDENTIALS).await?;
            return Err(if failed.code_sent {
                ShopError::VerificationRequired(failed.assessment.message)
            } else {
                ShopError::Unauthorized(failed.assessment.message)
            });
        };

        self.security.record_success(&email, client).await?;
        let now = Utc::now();
        let tokens = self.tokens.issue_pair(&customer, now)?;
        let device = DeviceInfo::resolve(input.device_info, &client.user_agent);
        if let Err(e) = self.sessions.create_or_update(&customer, &tokens, device, &client.ip).await {
            tracing::error!(customer = customer.id, error = %e, "failed to record session");
        }
        customer.last_login = Some(now);
        self.store.update_customer(&customer).await?;

        Ok(LoginResponse {
            access: tokens.access,
            refresh: tokens.refresh,
            user_id: customer.id,
            security: LoginSecurityInfo { tier: pre.tier, message: "Login successful" },
        })
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<Customer>> {
        let Some(customer) = self.store.customer_by_email(email).await? else {
            return Ok(None);
        };
        if !customer.is_active || !verify_password(password, &customer.password_hash).await {
            return Ok(None);
        }
        Ok(Some(customer))
    }

    pub async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> Result<RefreshResponse> {
        let claims = self.tokens.verify(refresh_token, TokenType::Refresh, Utc::now())?;
        let customer = self.current_customer(&claims).await?;
        if self.store.session_by_refresh_jti(&claims.jti).await?.is_some_and(|s| !s.is_active) {
            return Err(ShopError::Unauthorized("Session has been revoked. Please login again.".to_string()));
        }
        let (access, access_claims) = self.tokens.issue_access(&customer, Utc::now())?;
        self.sessions.touch_refresh(&claims.jti, &access_claims, &client.ip).await?;
        Ok(RefreshResponse { access, user_id: customer.id })
    }

    /// Resolves a bearer access token to its customer.
    pub async fn authenticate_access(&self, token: &str) -> Result<(Customer, Claims)> {
        let claims = self.tokens.verify(token, TokenType::Access, Utc::now())?;
        let customer = self.current_customer(&claims).await?;
        if self.sessions.is_revoked(&claims.jti).await? {
            return Err(ShopError::Unauthorized("Session has been revoked. Please login again.".to_string()));
        }
        Ok((customer, claims))
    }

    async fn current_customer(&self, claims: &Claims) -> Result<Customer> {
        let customer = self
            .store
            .customer(claims.user_id)
            .await?
            .ok_or_else(|| ShopError::Unauthorized("User no longer exists".to_string()))?;
        if !customer.is_active {
            return Err(ShopError::Unauthorized("User account is disabled".to_string()));
        }
        if customer.token_version != claims.token_version {
            return Err(ShopError::Unauthorized("Token has been invalidated. Please login again.".to_string()));
        }
        Ok(customer)
    }

    pub async fn update_profile(&self, customer: &Customer, update: ProfileUpdate) -> Result<Customer> {
        validate(&update)?;
        let mut customer = customer.clone();
        if let Some(first) = update.first_name { customer.first_name = first.trim().to_string(); }
        if let Some(last) = update.last_name { customer.last_name = last.trim().to_string(); }
        if let Some(phone) = update.phone_number { customer.phone_number = phone.trim().to_string(); }
        customer.updated_at = Utc::now();
        self.store.update_customer(&customer).await?;
        Ok(customer)
    }

    /// The newest few addresses.
    pub async fn addresses(&self, customer_id: i64) -> Result<Vec<AddressView>> {
        let mut addresses = self.store.addresses(customer_id).await?;
        addresses.truncate(LISTED_ADDRESSES);
        Ok(addresses.into_iter().map(AddressView::from).collect())
    }

    /// Returns the address and whether it was newly created.
    pub async fn add_address(&self, customer_id: i64, fields: AddressFields) -> Result<(Address, bool)> {
        if let Some(field) = fields.missing_required() {
            return Err(ShopError::Validation(format!("{field} is required.")));
        }
        let existing = self.store.addresses(customer_id).await?;
        if let Some(same) = existing.iter().find(|a| a.fields.same_place(&fields)) {
            return Ok((same.clone(), false));
        }
        if existing.len() >= MAX_ADDRESSES {
            return Err(ShopError::Validation(format!("You can only have up to {MAX_ADDRESSES} addresses.")));
        }
        let now = Utc::now();
        let address = self
            .store
            .insert_address(Address { id: 0, customer_id, fields, created_at: now, updated_at: now })
            .await?;
        Ok((address, true))
    }

    pub async fn update_address(&self, customer_id: i64, address_id: i64, fields: AddressFields) -> Result<Address> {
        if !self.address_edits.allow(&customer_id.to_string()).await {
            return Err(ShopError::RateLimited(format!(
                "Rate limit exceeded. Maximum {ADDRESS_EDITS_PER_MINUTE} address edits per minute allowed."
            )));
        }
        let mut address = self
            .store
            .addresses(customer_id)
            .await?
            .into_iter()
            .find(|a| a.id == address_id)
            .ok_or(ShopError::NotFound("Address"))?;
        if let Some(field) = fields.missing_required() {
            return Err(ShopError::Validation(format!("{field} is required.")));
        }
        address.fields = fields;
        address.updated_at = Utc::now();
        self.store.update_address(&address).await?;
        Ok(address)
    }

    pub async fn delete_address(&self, customer_id: i64, address_id: i64) -> Result<()> {
        if !self.store.delete_address(customer_id, address_id).await? {
            return Err(ShopError::NotFound("Address"));
        }
        Ok(())
    }

    /// Removes the account and its personal data. Orders stay, keyed by email.
    pub async fn delete_account(&self, customer: &Customer, password: Option<&str>) -> Result<DeletionReport> {
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ShopError::Validation("Password confirmation required".to_string()))?;
        if !verify_password(password, &customer.password_hash).await {
            tracing::warn!(email = %customer.email, "account deletion refused: invalid password");
            return Err(ShopError::Unauthorized("The password you entered is incorrect.".to_string()));
        }

        let email = customer.email.clone();
        let addresses = self.store.addresses(customer.id).await?;
        for address in &addresses {
            self.store.delete_address(customer.id, address.id).await?;
        }
        let anonymized = self
            .store
            .anonymize_attempts(&email, &format!("deleted_user_{}@deleted.local", customer.id))
            .await?;
        self.store.delete_locks(&email).await?;
        self.store.delete_codes(&email).await?;

        let name = customer.full_name();
        self.mailer.send_account_deleted(&email, &name, addresses.len()).await;
        let sessions_revoked = self.sessions.invalidate_all_tokens(customer).await?;
        self.store.delete_customer(customer.id).await?;

        tracing::warn!(
            email,
            customer = customer.id,
            addresses = addresses.len(),
            anonymized,
            "ACCOUNT DELETED"
        );
        self.events.publish(DomainEvent::Account(AccountEvent::Deleted { customer_id: customer.id })).await;

        Ok(DeletionReport {
            user: name,
            deleted_at: Utc::now(),
            addresses_deleted: addresses.len(),
            login_history_anonymized: anonymized,
            sessions_revoked,
        })
    }
}
