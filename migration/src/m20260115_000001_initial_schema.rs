use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create bloggers table
        manager
            .create_table(
                Table::create()
                    .table(Bloggers::Table)
                    .if_not_exists()
                    .col(pk_auto(Bloggers::Id))
                    .col(string_uniq(Bloggers::Username))
                    .col(string_null(Bloggers::Name))
                    .col(string_null(Bloggers::AvatarUrl))
                    .col(string(Bloggers::PasswordHash))
                    .col(string_null(Bloggers::GhToken))
                    .col(string_null(Bloggers::Email))
                    .col(
                        ColumnDef::new(Bloggers::EmailConfirmed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(string_null(Bloggers::EmailToken))
                    .col(
                        ColumnDef::new(Bloggers::Admin)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Bloggers::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create clients table
        manager
            .create_table(
                Table::create()
                    .table(Clients::Table)
                    .if_not_exists()
                    .col(pk_auto(Clients::Id))
                    .col(string_uniq(Clients::ClientId))
                    .col(string(Clients::SecretHash))
                    .col(string(Clients::Name))
                    .col(string_null(Clients::HomepageUri))
                    .col(string(Clients::RedirectUris))
                    .col(string(Clients::GrantTypes))
                    .col(string(Clients::Scopes))
                    .col(string(Clients::TokenEndpointAuthMethod))
                    .col(integer_null(Clients::DevId))
                    .col(big_integer(Clients::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create auth_codes table
        manager
            .create_table(
                Table::create()
                    .table(AuthCodes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthCodes::Code)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(AuthCodes::ClientId))
                    .col(string(AuthCodes::RedirectUri))
                    .col(string(AuthCodes::Scope))
                    .col(integer(AuthCodes::BloggerId))
                    .col(string(AuthCodes::CodeChallenge))
                    .col(string(AuthCodes::CodeChallengeMethod))
                    .col(big_integer(AuthCodes::CreatedAt))
                    .col(big_integer(AuthCodes::ExpiresAt))
                    .to_owned(),
            )
            .await?;

        // Create tokens table
        manager
            .create_table(
                Table::create()
                    .table(Tokens::Table)
                    .if_not_exists()
                    .col(pk_auto(Tokens::Id))
                    .col(string(Tokens::ClientId))
                    .col(integer_null(Tokens::BloggerId))
                    .col(string(Tokens::TokenType))
                    .col(string(Tokens::Scope))
                    .col(big_integer(Tokens::IssuedAt))
                    .col(big_integer(Tokens::ExpiresIn))
                    .col(string_uniq(Tokens::Selector))
                    .col(string(Tokens::ValidatorHash))
                    .col(big_integer_null(Tokens::RevokedAt))
                    .to_owned(),
            )
            .await?;

        // Create repos table
        manager
            .create_table(
                Table::create()
                    .table(Repos::Table)
                    .if_not_exists()
                    .col(pk_auto(Repos::Id))
                    .col(string_null(Repos::Name))
                    .col(string_uniq(Repos::FullName))
                    .col(string_null(Repos::Description))
                    .to_owned(),
            )
            .await?;

        // Create commit_posts table
        manager
            .create_table(
                Table::create()
                    .table(CommitPosts::Table)
                    .if_not_exists()
                    .col(pk_auto(CommitPosts::Id))
                    .col(string(CommitPosts::Hex))
                    .col(string(CommitPosts::Message))
                    .col(big_integer(CommitPosts::Created))
                    .col(integer(CommitPosts::RepoId))
                    .col(integer(CommitPosts::BloggerId))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-commit-posts-hex-repo")
                    .table(CommitPosts::Table)
                    .col(CommitPosts::Hex)
                    .col(CommitPosts::RepoId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create tasks table
        manager
            .create_table(
                Table::create()
                    .table(Tasks::Table)
                    .if_not_exists()
                    .col(pk_auto(Tasks::Id))
                    .col(string(Tasks::Task))
                    .col(string(Tasks::Details))
                    .col(big_integer(Tasks::Created))
                    .col(big_integer_null(Tasks::Started))
                    .col(big_integer_null(Tasks::Completed))
                    .col(integer_null(Tasks::BloggerId))
                    .to_owned(),
            )
            .await?;

        // Create sessions table
        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sessions::SessionId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(integer(Sessions::BloggerId))
                    .col(string(Sessions::CsrfToken))
                    .col(big_integer(Sessions::CreatedAt))
                    .col(big_integer(Sessions::ExpiresAt))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tasks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CommitPosts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Repos::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tokens::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuthCodes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Clients::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Bloggers::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Bloggers {
    Table,
    Id,
    Username,
    Name,
    AvatarUrl,
    PasswordHash,
    GhToken,
    Email,
    EmailConfirmed,
    EmailToken,
    Admin,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Clients {
    Table,
    Id,
    ClientId,
    SecretHash,
    Name,
    HomepageUri,
    RedirectUris,
    GrantTypes,
    Scopes,
    TokenEndpointAuthMethod,
    DevId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum AuthCodes {
    Table,
    Code,
    ClientId,
    RedirectUri,
    Scope,
    BloggerId,
    CodeChallenge,
    CodeChallengeMethod,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum Tokens {
    Table,
    Id,
    ClientId,
    BloggerId,
    TokenType,
    Scope,
    IssuedAt,
    ExpiresIn,
    Selector,
    ValidatorHash,
    RevokedAt,
}

#[derive(DeriveIden)]
enum Repos {
    Table,
    Id,
    Name,
    FullName,
    Description,
}

#[derive(DeriveIden)]
enum CommitPosts {
    Table,
    Id,
    Hex,
    Message,
    Created,
    RepoId,
    BloggerId,
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
    Task,
    Details,
    Created,
    Started,
    Completed,
    BloggerId,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    SessionId,
    BloggerId,
    CsrfToken,
    CreatedAt,
    ExpiresAt,
}
